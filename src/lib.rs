//! Context-scoped transaction reuse for async SQL code.
//!
//! A [`DbContext`] travels with a request and says which executor statements
//! should run on: the connection pool, or a transaction somebody up the call
//! chain already opened. [`transaction`] and [`transaction_with_result`]
//! reuse that transaction when there is one, and otherwise begin, commit and
//! roll back their own.
//!
//! Backends: `SQLite` via rusqlite (feature `sqlite`, default) and Postgres via
//! tokio-postgres (feature `postgres`), both pooled with bb8. Recording mocks
//! live behind the `test-utils` feature.

pub mod context;
pub mod db_context;
pub mod error;
pub mod executor;
pub mod options;
pub mod prelude;
pub mod results;
pub mod transaction;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use context::{
    BaseContext, Context, ContextRef, background, done, with_cancel, with_deadline, with_timeout,
    with_value,
};
pub use db_context::DbContext;
pub use error::DbxError;
pub use executor::{Beginner, ContextCreator, Database, Executor, Transactor};
pub use options::{TxOption, TxOptions, isolation_level, new_transaction, read_only};
pub use results::{CustomDbRow, ExecResult, ResultSet, SingleRow};
pub use transaction::{transaction, transaction_with_result};
pub use types::{DatabaseType, IsolationLevel, RowValues};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresDatabase, PostgresOptions};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDatabase, SqliteOptions};
