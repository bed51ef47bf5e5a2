use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::Context;
use crate::error::DbxError;
use crate::executor::{Executor, Transactor};
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

use super::config::SqlitePooledConnection;
use super::connection::{finish_transaction, run_blocking, run_with_context};
use super::params::Params;
use super::query::{build_result_set, execute_statement};

/// Open `SQLite` transaction owning one pooled connection until it finishes.
///
/// Dropping an unfinished transaction rolls it back on the current tokio runtime.
pub struct SqliteTx {
    conn: Mutex<Option<SqlitePooledConnection>>,
    read_only: bool,
}

impl SqliteTx {
    pub(crate) fn new(conn: SqlitePooledConnection, read_only: bool) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            read_only,
        }
    }

    async fn finish(&self, sql: &'static str) -> Result<(), DbxError> {
        let conn = self
            .conn
            .lock()
            .await
            .take()
            .ok_or(DbxError::TransactionClosed)?;
        let reset = self.read_only;
        let result = run_blocking(Arc::clone(&*conn), move |guard| {
            finish_transaction(guard, sql, reset)
        })
        .await;
        debug!(statement = sql, ok = result.is_ok(), "sqlite transaction finished");
        result
    }
}

impl std::fmt::Debug for SqliteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTx")
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Executor for SqliteTx {
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, DbxError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(DbxError::TransactionClosed)?;
        let sql_owned = query.to_owned();
        let params = Params::convert(params);
        run_with_context(ctx, Arc::clone(&**conn), move |c| {
            execute_statement(c, &sql_owned, params.as_values())
        })
        .await
    }

    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbxError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(DbxError::TransactionClosed)?;
        let sql_owned = query.to_owned();
        let params = Params::convert(params);
        run_with_context(ctx, Arc::clone(&**conn), move |c| {
            build_result_set(c, &sql_owned, params.as_values())
        })
        .await
    }

    fn as_transactor(self: Arc<Self>) -> Option<Arc<dyn Transactor>> {
        Some(self)
    }
}

#[async_trait]
impl Transactor for SqliteTx {
    async fn commit(&self) -> Result<(), DbxError> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DbxError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let reset = self.read_only;
            handle.spawn(async move {
                let shared = Arc::clone(&*conn);
                let _ = run_blocking(shared, move |c| finish_transaction(c, "ROLLBACK", reset)).await;
                drop(conn);
            });
        }
    }
}
