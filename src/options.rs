use serde::{Deserialize, Serialize};

use crate::types::IsolationLevel;

/// Settings for one transaction call, fixed once all options are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    /// Begin a new transaction even when the context already carries one.
    pub new_transaction: bool,
}

impl TxOptions {
    /// Apply `options` in order to the defaults. Later options win on the same field.
    #[must_use]
    pub fn from_options(options: &[TxOption]) -> Self {
        options
            .iter()
            .fold(TxOptions::default(), |draft, option| draft.with(*option))
    }

    #[must_use]
    pub fn with(mut self, option: TxOption) -> Self {
        option.apply(&mut self);
        self
    }

    /// The options that rebuild this snapshot, e.g. for a snapshot loaded from config.
    #[must_use]
    pub fn to_options(&self) -> Vec<TxOption> {
        let mut out = vec![
            TxOption::IsolationLevel(self.isolation),
            TxOption::ReadOnly(self.read_only),
        ];
        if self.new_transaction {
            out.push(TxOption::NewTransaction);
        }
        out
    }
}

/// A single configuration step for [`TxOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOption {
    IsolationLevel(IsolationLevel),
    ReadOnly(bool),
    NewTransaction,
}

impl TxOption {
    fn apply(self, draft: &mut TxOptions) {
        match self {
            TxOption::IsolationLevel(level) => draft.isolation = level,
            TxOption::ReadOnly(read_only) => draft.read_only = read_only,
            TxOption::NewTransaction => draft.new_transaction = true,
        }
    }
}

#[must_use]
pub fn isolation_level(level: IsolationLevel) -> TxOption {
    TxOption::IsolationLevel(level)
}

#[must_use]
pub fn read_only(read_only: bool) -> TxOption {
    TxOption::ReadOnly(read_only)
}

/// Force an independent transaction even inside an existing one.
#[must_use]
pub fn new_transaction() -> TxOption {
    TxOption::NewTransaction
}
