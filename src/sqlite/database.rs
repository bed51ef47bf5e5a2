use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tracing::debug;

use crate::context::{Context, ContextRef};
use crate::db_context::DbContext;
use crate::error::DbxError;
use crate::executor::{Beginner, ContextCreator, Database, Executor, Transactor};
use crate::options::TxOptions;
use crate::results::{ExecResult, ResultSet};
use crate::types::{DatabaseType, IsolationLevel, RowValues};

use super::config::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};
use super::connection::{run_blocking, run_with_context};
use super::params::Params;
use super::query::{build_result_set, execute_statement};
use super::transaction::SqliteTx;

/// `SQLite` database handle backed by a bb8 pool of rusqlite connections.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: Pool<SqliteManager>,
    closed: Arc<AtomicBool>,
}

impl SqliteDatabase {
    /// Open a pool for `opts`.
    ///
    /// # Errors
    /// Returns `DbxError::ConfigError` for invalid options, or the error from
    /// opening the first connection.
    pub async fn new(opts: SqliteOptions) -> Result<Self, DbxError> {
        let pool = SqliteManager::build_pool(&opts).await?;
        debug!(db_path = %opts.db_path, max_connections = opts.max_connections, "sqlite pool ready");
        Ok(Self {
            pool,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn builder(db_path: String) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<SqliteManager> {
        &self.pool
    }

    /// Run a batch of statements outside any transaction (DDL, seeding).
    ///
    /// # Errors
    /// Returns `DbxError` if checkout or any statement fails.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DbxError> {
        let conn = self.checkout().await?;
        let sql_owned = sql.to_owned();
        run_blocking(Arc::clone(&*conn), move |guard| {
            guard.execute_batch(&sql_owned).map_err(DbxError::from)
        })
        .await
    }

    async fn checkout(&self) -> Result<PooledConnection<'_, SqliteManager>, DbxError> {
        self.ensure_open()?;
        self.pool
            .get()
            .await
            .map_err(|e| DbxError::ConnectionError(format!("sqlite checkout error: {e}")))
    }

    fn ensure_open(&self) -> Result<(), DbxError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DbxError::ConnectionError("sqlite database is closed".into()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("pool", &self.pool.state())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// `BEGIN` batch for the requested options.
///
/// `SQLite` transactions are always serializable. `Serializable` takes the
/// write lock up front (`IMMEDIATE`); read-only transactions switch the
/// connection to `query_only` until they finish.
pub(crate) fn begin_statement(options: &TxOptions) -> &'static str {
    if options.read_only {
        "BEGIN DEFERRED; PRAGMA query_only = ON;"
    } else if options.isolation == IsolationLevel::Serializable {
        "BEGIN IMMEDIATE"
    } else {
        "BEGIN DEFERRED"
    }
}

#[async_trait]
impl Executor for SqliteDatabase {
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, DbxError> {
        let conn = self.checkout().await?;
        let sql_owned = query.to_owned();
        let params = Params::convert(params);
        run_with_context(ctx, Arc::clone(&*conn), move |guard| {
            execute_statement(guard, &sql_owned, params.as_values())
        })
        .await
    }

    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbxError> {
        let conn = self.checkout().await?;
        let sql_owned = query.to_owned();
        let params = Params::convert(params);
        run_with_context(ctx, Arc::clone(&*conn), move |guard| {
            build_result_set(guard, &sql_owned, params.as_values())
        })
        .await
    }
}

#[async_trait]
impl Beginner for SqliteDatabase {
    async fn begin_transaction(
        &self,
        ctx: &dyn Context,
        options: &TxOptions,
    ) -> Result<Arc<dyn Transactor>, DbxError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.ensure_open()?;
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| DbxError::ConnectionError(format!("sqlite checkout error: {e}")))?;
        let begin = begin_statement(options);
        run_with_context(ctx, Arc::clone(&*conn), move |guard| {
            guard.execute_batch(begin).map_err(DbxError::from)
        })
        .await?;
        debug!(statement = begin, "sqlite transaction started");
        Ok(Arc::new(SqliteTx::new(conn, options.read_only)))
    }
}

impl ContextCreator for SqliteDatabase {
    fn context(&self, parent: ContextRef) -> DbContext {
        DbContext::new(parent, Arc::new(self.clone()))
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    /// Marks the handle and its clones closed; the pool itself is not drained.
    async fn close(&self) -> Result<(), DbxError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{isolation_level, read_only};

    #[test]
    fn begin_statement_follows_options() {
        assert_eq!(begin_statement(&TxOptions::default()), "BEGIN DEFERRED");
        assert_eq!(
            begin_statement(&TxOptions::from_options(&[isolation_level(
                IsolationLevel::Serializable
            )])),
            "BEGIN IMMEDIATE"
        );
        assert_eq!(
            begin_statement(&TxOptions::from_options(&[
                isolation_level(IsolationLevel::Serializable),
                read_only(true),
            ])),
            "BEGIN DEFERRED; PRAGMA query_only = ON;"
        );
    }
}
