// SQLite backend
//
// - config: pool options, builder and the bb8 connection manager
// - params: RowValues -> rusqlite values
// - query: statement execution and result extraction
// - connection: blocking-worker helpers shared by the pool and transactions
// - database: the pool executor / transaction beginner
// - transaction: the transaction handle

pub mod config;
pub mod params;
pub mod query;

mod connection;
mod database;
mod transaction;

pub use config::{
    SharedSqliteConnection, SqliteHandle, SqliteManager, SqliteOptions, SqliteOptionsBuilder,
};
pub use database::SqliteDatabase;
pub use query::build_result_set;
pub use transaction::SqliteTx;
