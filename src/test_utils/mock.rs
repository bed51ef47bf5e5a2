use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::context::{Context, ContextRef};
use crate::db_context::DbContext;
use crate::error::DbxError;
use crate::executor::{Beginner, ContextCreator, Database, Executor, Transactor};
use crate::options::TxOptions;
use crate::results::{ExecResult, ResultSet};
use crate::types::{DatabaseType, RowValues};

use super::journal::{Event, Journal, Target};

#[derive(Debug, Default)]
struct Faults {
    begin: bool,
    commit: bool,
    rollback: bool,
    statements: Vec<String>,
}

#[derive(Debug)]
struct Shared {
    journal: Journal,
    faults: Mutex<Faults>,
    next_tx: AtomicU64,
    closed: AtomicBool,
    exec_result: Mutex<ExecResult>,
    result_set: Mutex<ResultSet>,
}

impl Shared {
    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_exec(&self, ctx: &dyn Context, on: Target, sql: &str) -> Result<ExecResult, DbxError> {
        self.check(ctx)?;
        self.journal.record(Event::Exec {
            on,
            sql: sql.to_string(),
        });
        self.statement_fault(sql)?;
        Ok(*self
            .exec_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn run_query(&self, ctx: &dyn Context, on: Target, sql: &str) -> Result<ResultSet, DbxError> {
        self.check(ctx)?;
        self.journal.record(Event::Query {
            on,
            sql: sql.to_string(),
        });
        self.statement_fault(sql)?;
        Ok(self
            .result_set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn check(&self, ctx: &dyn Context) -> Result<(), DbxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbxError::ConnectionError("mock database is closed".into()));
        }
        match ctx.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn statement_fault(&self, sql: &str) -> Result<(), DbxError> {
        if self.faults().statements.iter().any(|frag| sql.contains(frag.as_str())) {
            return Err(DbxError::ExecutionError(format!("injected failure: {sql}")));
        }
        Ok(())
    }
}

/// In-memory stand-in for a database handle.
///
/// Clones share the journal, the fault switches and the transaction counter.
#[derive(Debug, Clone)]
pub struct MockDatabase {
    shared: Arc<Shared>,
}

impl Default for MockDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// A mock that records into an existing journal.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            shared: Arc::new(Shared {
                journal,
                faults: Mutex::default(),
                next_tx: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                exec_result: Mutex::new(ExecResult::new(1, None)),
                result_set: Mutex::new(ResultSet::default()),
            }),
        }
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    pub fn fail_begin(&self, fail: bool) {
        self.shared.faults().begin = fail;
    }

    pub fn fail_commit(&self, fail: bool) {
        self.shared.faults().commit = fail;
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.shared.faults().rollback = fail;
    }

    /// Fail every statement whose SQL contains `fragment`.
    pub fn fail_statement(&self, fragment: impl Into<String>) {
        self.shared.faults().statements.push(fragment.into());
    }

    /// What every exec returns from now on.
    pub fn set_exec_result(&self, result: ExecResult) {
        *self
            .shared
            .exec_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = result;
    }

    /// What every query returns from now on.
    pub fn set_result_set(&self, result_set: ResultSet) {
        *self
            .shared
            .result_set
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = result_set;
    }
}

#[async_trait]
impl Executor for MockDatabase {
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ExecResult, DbxError> {
        self.shared.run_exec(ctx, Target::Pool, query)
    }

    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ResultSet, DbxError> {
        self.shared.run_query(ctx, Target::Pool, query)
    }
}

#[async_trait]
impl Beginner for MockDatabase {
    async fn begin_transaction(
        &self,
        ctx: &dyn Context,
        options: &TxOptions,
    ) -> Result<Arc<dyn Transactor>, DbxError> {
        self.shared.check(ctx)?;
        if self.shared.faults().begin {
            return Err(DbxError::ConnectionError("injected begin failure".into()));
        }
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed);
        self.shared.journal.record(Event::Begin {
            tx: id,
            options: *options,
        });
        Ok(Arc::new(MockTransactor {
            id,
            options: *options,
            finished: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        }))
    }
}

impl ContextCreator for MockDatabase {
    fn context(&self, parent: ContextRef) -> DbContext {
        DbContext::new(parent, Arc::new(self.clone()))
    }
}

#[async_trait]
impl Database for MockDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mock
    }

    async fn close(&self) -> Result<(), DbxError> {
        self.shared.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Transaction handed out by [`MockDatabase`].
///
/// Commit and rollback are recorded even when an injected fault makes them
/// fail; either one closes the handle.
#[derive(Debug)]
pub struct MockTransactor {
    id: u64,
    options: TxOptions,
    finished: AtomicBool,
    shared: Arc<Shared>,
}

impl MockTransactor {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn options(&self) -> TxOptions {
        self.options
    }

    fn ensure_open(&self) -> Result<(), DbxError> {
        if self.finished.load(Ordering::Acquire) {
            Err(DbxError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    fn finish(&self, event: Event, fail: bool, what: &str) -> Result<(), DbxError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(DbxError::TransactionClosed);
        }
        self.shared.journal.record(event);
        if fail {
            return Err(DbxError::ExecutionError(format!("injected {what} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for MockTransactor {
    async fn execute_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ExecResult, DbxError> {
        self.ensure_open()?;
        self.shared.run_exec(ctx, Target::Tx(self.id), query)
    }

    async fn query_context(
        &self,
        ctx: &dyn Context,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ResultSet, DbxError> {
        self.ensure_open()?;
        self.shared.run_query(ctx, Target::Tx(self.id), query)
    }

    fn as_transactor(self: Arc<Self>) -> Option<Arc<dyn Transactor>> {
        Some(self)
    }
}

#[async_trait]
impl Transactor for MockTransactor {
    async fn commit(&self) -> Result<(), DbxError> {
        let fail = self.shared.faults().commit;
        self.finish(Event::Commit { tx: self.id }, fail, "commit")
    }

    async fn rollback(&self) -> Result<(), DbxError> {
        let fail = self.shared.faults().rollback;
        self.finish(Event::Rollback { tx: self.id }, fail, "rollback")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::background;

    #[tokio::test]
    async fn records_calls_with_tx_ids() {
        let db = MockDatabase::new();
        let tx = db.begin().await.expect("begin");
        tx.execute("INSERT INTO t VALUES (1)", &[]).await.expect("exec");
        db.query("SELECT 1", &[]).await.expect("query");
        tx.commit().await.expect("commit");

        assert_eq!(
            db.journal().events(),
            vec![
                Event::Begin {
                    tx: 1,
                    options: TxOptions::default()
                },
                Event::Exec {
                    on: Target::Tx(1),
                    sql: "INSERT INTO t VALUES (1)".into()
                },
                Event::Query {
                    on: Target::Pool,
                    sql: "SELECT 1".into()
                },
                Event::Commit { tx: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn finished_transactions_reject_work() {
        let db = MockDatabase::new();
        let tx = db.begin().await.expect("begin");
        tx.rollback().await.expect("rollback");
        assert!(matches!(
            tx.execute("UPDATE t SET x = 1", &[]).await,
            Err(DbxError::TransactionClosed)
        ));
        assert!(matches!(tx.commit().await, Err(DbxError::TransactionClosed)));
        assert_eq!(db.journal().rollbacks(), 1);
        assert_eq!(db.journal().commits(), 0);
    }

    #[tokio::test]
    async fn injected_statement_failure_is_recorded() {
        let db = MockDatabase::new();
        db.fail_statement("bad_table");
        let err = db
            .execute_context(background().as_ref(), "DELETE FROM bad_table", &[])
            .await
            .expect_err("should fail");
        assert!(matches!(err, DbxError::ExecutionError(_)));
        assert_eq!(db.journal().statements().len(), 1);
    }

    #[tokio::test]
    async fn pool_is_not_a_transactor() {
        let db: Arc<dyn Executor> = Arc::new(MockDatabase::new());
        assert!(db.as_transactor().is_none());
    }
}
