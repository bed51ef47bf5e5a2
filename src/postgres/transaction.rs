use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::Context;
use crate::error::DbxError;
use crate::executor::{Executor, Transactor};
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

use super::config::PgPooledConnection;
use super::connection::{execute, select};

/// Open Postgres transaction owning one pooled client until it finishes.
///
/// Dropping an unfinished transaction issues a `ROLLBACK` on the current runtime.
pub struct PostgresTx {
    client: Mutex<Option<PgPooledConnection>>,
}

impl PostgresTx {
    pub(crate) fn new(client: PgPooledConnection) -> Self {
        Self {
            client: Mutex::new(Some(client)),
        }
    }

    async fn finish(&self, sql: &str) -> Result<(), DbxError> {
        let client = self
            .client
            .lock()
            .await
            .take()
            .ok_or(DbxError::TransactionClosed)?;
        let result = client.batch_execute(sql).await.map_err(DbxError::from);
        if result.is_err() {
            // Best effort; the server may already have ended the transaction.
            let _ = client.batch_execute("ROLLBACK").await;
        }
        debug!(statement = sql, ok = result.is_ok(), "postgres transaction finished");
        result
    }
}

#[async_trait]
impl Executor for PostgresTx {
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, DbxError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(DbxError::TransactionClosed)?;
        execute(ctx, client, query, params).await
    }

    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbxError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(DbxError::TransactionClosed)?;
        select(ctx, client, query, params).await
    }

    fn as_transactor(self: Arc<Self>) -> Option<Arc<dyn Transactor>> {
        Some(self)
    }
}

#[async_trait]
impl Transactor for PostgresTx {
    async fn commit(&self) -> Result<(), DbxError> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DbxError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        if let Some(client) = self.client.get_mut().take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                let _ = client.batch_execute("ROLLBACK").await;
            });
        }
    }
}
