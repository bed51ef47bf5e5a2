use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::spawn_blocking;

use crate::context::{Context, done};
use crate::error::DbxError;

use super::config::SharedSqliteConnection;

/// Run synchronous rusqlite work on a blocking worker.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, DbxError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbxError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.connection().blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| DbxError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Like [`run_blocking`], but gives up when `ctx` is done.
///
/// Work that has not started by then is skipped; a statement already
/// running is interrupted. A statement that starts between the two checks
/// can still run to completion.
pub(crate) async fn run_with_context<F, R>(
    ctx: &dyn Context,
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, DbxError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbxError> + Send + 'static,
    R: Send + 'static,
{
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    let abandoned = Arc::new(AtomicBool::new(false));
    let worker_flag = Arc::clone(&abandoned);
    let handle = Arc::clone(&conn);
    let work = run_blocking(conn, move |guard| {
        if worker_flag.load(Ordering::Acquire) {
            return Err(DbxError::Cancelled);
        }
        func(guard)
    });
    tokio::select! {
        result = work => result,
        reason = done(ctx) => {
            abandoned.store(true, Ordering::Release);
            handle.interrupt_handle().interrupt();
            Err(reason)
        }
    }
}

/// Finish a transaction with `sql` (`COMMIT` or `ROLLBACK`).
///
/// A failed `COMMIT` leaves `SQLite` inside the transaction, so it is rolled
/// back here before the connection goes back to the pool. `query_only` is
/// always switched off again for read-only transactions.
pub(crate) fn finish_transaction(
    conn: &mut rusqlite::Connection,
    sql: &str,
    reset_query_only: bool,
) -> Result<(), DbxError> {
    let result = conn.execute_batch(sql).map_err(DbxError::from);
    if result.is_err() && !conn.is_autocommit() {
        let _ = conn.execute_batch("ROLLBACK");
    }
    if reset_query_only {
        let _ = conn.execute_batch("PRAGMA query_only = OFF");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{background, with_cancel};
    use crate::sqlite::config::SqliteHandle;

    fn count_rows(conn: &mut rusqlite::Connection) -> Result<i64, DbxError> {
        Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?)
    }

    #[tokio::test]
    async fn cancelled_work_that_never_started_is_skipped() {
        let conn = Arc::new(SqliteHandle::new(
            rusqlite::Connection::open_in_memory().expect("open"),
        ));
        conn.connection()
            .lock()
            .await
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .expect("schema");

        let (ctx, cancel) = with_cancel(&background());
        // Occupy the connection so the insert queues behind this guard.
        let busy = conn.connection().lock().await;
        let pending = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                run_with_context(ctx.as_ref(), conn, |c| {
                    c.execute("INSERT INTO t VALUES (1)", [])?;
                    Ok(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = pending.await.expect("join");
        assert!(matches!(result, Err(DbxError::Cancelled)));

        drop(busy);
        let count = run_blocking(Arc::clone(&conn), count_rows)
            .await
            .expect("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn live_context_runs_work() {
        let conn = Arc::new(SqliteHandle::new(
            rusqlite::Connection::open_in_memory().expect("open"),
        ));
        let ctx = background();
        run_with_context(ctx.as_ref(), Arc::clone(&conn), |c| {
            c.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")?;
            Ok(())
        })
        .await
        .expect("run");
        let count = run_blocking(conn, count_rows).await.expect("count");
        assert_eq!(count, 1);
    }
}
