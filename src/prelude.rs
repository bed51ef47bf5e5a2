//! Everything a typical caller needs in one import.

pub use crate::context::{
    Context, ContextRef, background, with_cancel, with_deadline, with_timeout, with_value,
};
pub use crate::db_context::{self, DbContext};
pub use crate::error::DbxError;
pub use crate::executor::{Beginner, ContextCreator, Database, Executor, Transactor};
pub use crate::options::{TxOption, TxOptions, isolation_level, new_transaction, read_only};
pub use crate::results::{CustomDbRow, ExecResult, ResultSet, SingleRow};
pub use crate::transaction::{transaction, transaction_with_result};
pub use crate::types::{IsolationLevel, RowValues};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresDatabase, PostgresOptions};
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteDatabase, SqliteOptions};
