use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, ContextRef, background};
use crate::db_context::DbContext;
use crate::error::DbxError;
use crate::options::TxOptions;
use crate::results::{ExecResult, ResultSet, SingleRow};
use crate::types::{DatabaseType, RowValues};

/// Runs parameterized statements, either on the pool or inside a transaction.
///
/// The `_context` forms honour the context's cancellation and deadline; the
/// short forms run under [`background`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a statement that returns no rows.
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ExecResult, DbxError>;

    /// Execute a statement and collect the rows it returns.
    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbxError>;

    /// Execute a statement expected to return at most one row.
    ///
    /// Errors are deferred into the returned [`SingleRow`].
    async fn query_row_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        params: &[RowValues],
    ) -> SingleRow {
        SingleRow::from_result_set(self.query_context(ctx, query, params).await)
    }

    async fn execute(&self, query: &str, params: &[RowValues]) -> Result<ExecResult, DbxError> {
        self.execute_context(background().as_ref(), query, params)
            .await
    }

    async fn query(&self, query: &str, params: &[RowValues]) -> Result<ResultSet, DbxError> {
        self.query_context(background().as_ref(), query, params)
            .await
    }

    async fn query_row(&self, query: &str, params: &[RowValues]) -> SingleRow {
        self.query_row_context(background().as_ref(), query, params)
            .await
    }

    /// Narrow to the transaction capability. Only live transaction handles return `Some`.
    fn as_transactor(self: Arc<Self>) -> Option<Arc<dyn Transactor>> {
        None
    }
}

/// An open transaction: an executor that can also be committed or rolled back.
#[async_trait]
pub trait Transactor: Executor {
    /// Make every statement run since begin permanent.
    async fn commit(&self) -> Result<(), DbxError>;

    /// Discard every statement run since begin.
    async fn rollback(&self) -> Result<(), DbxError>;
}

/// Anything that can start a new transaction.
#[async_trait]
pub trait Beginner: Send + Sync {
    async fn begin_transaction(
        &self,
        ctx: &dyn Context,
        options: &TxOptions,
    ) -> Result<Arc<dyn Transactor>, DbxError>;

    /// Begin with default options under [`background`].
    async fn begin(&self) -> Result<Arc<dyn Transactor>, DbxError> {
        self.begin_transaction(background().as_ref(), &TxOptions::default())
            .await
    }
}

/// Bootstraps a carrier that talks to the pool directly.
pub trait ContextCreator: Send + Sync {
    fn context(&self, parent: ContextRef) -> DbContext;
}

/// A database handle: pool executor, transaction source and carrier factory.
#[async_trait]
pub trait Database: Executor + Beginner + ContextCreator {
    fn database_type(&self) -> DatabaseType;

    /// Refuse further work: later statements and begins fail with
    /// [`DbxError::ConnectionError`]. Transactions already begun keep their
    /// connection until they finish; idle pooled connections are released
    /// when the last clone of the handle is dropped.
    async fn close(&self) -> Result<(), DbxError>;
}
