// Postgres backend
//
// - config: pool options, builder and the bb8 connection manager
// - params: RowValues as tokio-postgres parameters
// - query: row decoding
// - connection: context-aware statement helpers shared by pool and transactions
// - database / transaction: the executor implementations

pub mod config;
pub mod params;
pub mod query;

mod connection;
mod database;
mod transaction;

pub use config::{PgManager, PostgresOptions, PostgresOptionsBuilder};
pub use database::PostgresDatabase;
pub use query::build_result_set_from_rows;
pub use transaction::PostgresTx;
