use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bb8::Pool;
use tracing::debug;

use crate::context::{Context, ContextRef};
use crate::db_context::DbContext;
use crate::error::DbxError;
use crate::executor::{Beginner, ContextCreator, Database, Executor, Transactor};
use crate::options::TxOptions;
use crate::results::{ExecResult, ResultSet};
use crate::types::{DatabaseType, RowValues};

use super::config::{PgManager, PostgresOptions, PostgresOptionsBuilder};
use super::connection::{begin_or_abort, begin_statement, execute, select, with_context};
use super::transaction::PostgresTx;

/// Postgres database handle backed by a bb8 pool of tokio-postgres clients.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: Pool<PgManager>,
    closed: Arc<AtomicBool>,
}

impl PostgresDatabase {
    /// Build a pool for `opts`.
    ///
    /// # Errors
    /// Returns `DbxError::ConfigError` for incomplete options, or
    /// `DbxError::ConnectionError` if the pool cannot be built.
    pub async fn new(opts: PostgresOptions) -> Result<Self, DbxError> {
        let pool = PgManager::new(opts.to_pg_config()?)
            .build_pool(opts.max_connections)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<PgManager>) -> Self {
        Self {
            pool,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn builder() -> PostgresOptionsBuilder {
        PostgresOptionsBuilder::default()
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<PgManager> {
        &self.pool
    }

    /// Run a batch of statements outside any transaction.
    ///
    /// # Errors
    /// Returns `DbxError` if checkout or any statement fails.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DbxError> {
        let client = self.checkout().await?;
        client.batch_execute(sql).await.map_err(DbxError::from)
    }

    async fn checkout(&self) -> Result<bb8::PooledConnection<'_, PgManager>, DbxError> {
        self.ensure_open()?;
        self.pool
            .get()
            .await
            .map_err(|e| DbxError::ConnectionError(format!("postgres checkout error: {e}")))
    }

    fn ensure_open(&self) -> Result<(), DbxError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DbxError::ConnectionError("postgres database is closed".into()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for PostgresDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDatabase")
            .field("pool", &self.pool.state())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl Executor for PostgresDatabase {
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, DbxError> {
        let client = self.checkout().await?;
        execute(ctx, &client, query, params).await
    }

    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbxError> {
        let client = self.checkout().await?;
        select(ctx, &client, query, params).await
    }
}

#[async_trait]
impl Beginner for PostgresDatabase {
    async fn begin_transaction(
        &self,
        ctx: &dyn Context,
        options: &TxOptions,
    ) -> Result<Arc<dyn Transactor>, DbxError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.ensure_open()?;
        let client = self
            .pool
            .get_owned()
            .await
            .map_err(|e| DbxError::ConnectionError(format!("postgres checkout error: {e}")))?;
        let begin = begin_statement(options);
        begin_or_abort(
            with_context(ctx, &client, client.batch_execute(&begin)),
            client.batch_execute("ROLLBACK"),
        )
        .await?;
        debug!(statement = %begin, "postgres transaction started");
        Ok(Arc::new(PostgresTx::new(client)))
    }
}

impl ContextCreator for PostgresDatabase {
    fn context(&self, parent: ContextRef) -> DbContext {
        DbContext::new(parent, Arc::new(self.clone()))
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    /// Marks the handle and its clones closed; the pool itself is not drained.
    async fn close(&self) -> Result<(), DbxError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
