use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::options::TxOptions;

/// Which executor a statement ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Pool,
    Tx(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin { tx: u64, options: TxOptions },
    Exec { on: Target, sql: String },
    Query { on: Target, sql: String },
    Commit { tx: u64 },
    Rollback { tx: u64 },
}

/// Append-only call log shared by a mock database and its transactions.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.lock().push(event);
    }

    /// Snapshot of everything recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin { .. }))
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit { .. }))
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback { .. }))
    }

    /// SQL of every statement, in the order it ran.
    #[must_use]
    pub fn statements(&self) -> Vec<(Target, String)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Exec { on, sql } | Event::Query { on, sql } => Some((*on, sql.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
