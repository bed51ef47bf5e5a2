use std::future::Future;

use tokio_postgres::{Client, NoTls};
use tracing::warn;

use crate::context::{Context, done};
use crate::error::DbxError;
use crate::options::TxOptions;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

use super::params::as_sql_params;
use super::query::build_result_set_from_rows;

/// Drive `work` on `client` until it finishes or `ctx` is done.
///
/// When the context ends first, the server is asked to cancel the running query.
pub(crate) async fn with_context<R, W>(
    ctx: &dyn Context,
    client: &Client,
    work: W,
) -> Result<R, DbxError>
where
    W: Future<Output = Result<R, tokio_postgres::Error>>,
{
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    let cancel = client.cancel_token();
    tokio::select! {
        result = work => result.map_err(DbxError::from),
        reason = done(ctx) => {
            if let Err(e) = cancel.cancel_query(NoTls).await {
                warn!(error = %e, "postgres cancel request failed");
            }
            Err(reason)
        }
    }
}

/// Run `begin`; when it fails, run `abort` before reporting the error.
///
/// A `BEGIN` that lost the race against a finished context may already have
/// reached the server, and the session must not go back to the pool inside it.
pub(crate) async fn begin_or_abort<B, A, E>(begin: B, abort: A) -> Result<(), DbxError>
where
    B: Future<Output = Result<(), DbxError>>,
    A: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let Err(err) = begin.await else {
        return Ok(());
    };
    if let Err(e) = abort.await {
        warn!(error = %e, "rollback after failed begin also failed");
    }
    Err(err)
}

pub(crate) async fn execute(
    ctx: &dyn Context,
    client: &Client,
    query: &str,
    params: &[RowValues],
) -> Result<ExecResult, DbxError> {
    let refs = as_sql_params(params);
    let affected = with_context(ctx, client, client.execute(query, &refs)).await?;
    Ok(ExecResult::new(affected, None))
}

pub(crate) async fn select(
    ctx: &dyn Context,
    client: &Client,
    query: &str,
    params: &[RowValues],
) -> Result<ResultSet, DbxError> {
    let refs = as_sql_params(params);
    let rows = with_context(ctx, client, client.query(query, &refs)).await?;
    build_result_set_from_rows(&rows)
}

/// `BEGIN` statement for the requested options.
pub(crate) fn begin_statement(options: &TxOptions) -> String {
    let mut sql = String::from("BEGIN");
    if let Some(level) = options.isolation.as_sql() {
        sql.push_str(" ISOLATION LEVEL ");
        sql.push_str(level);
    }
    sql.push_str(if options.read_only {
        " READ ONLY"
    } else {
        " READ WRITE"
    });
    sql
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::options::{isolation_level, read_only};
    use crate::types::IsolationLevel;

    #[tokio::test]
    async fn failed_begin_runs_abort() {
        let aborted = AtomicBool::new(false);
        let result = begin_or_abort(async { Err::<(), _>(DbxError::Cancelled) }, async {
            aborted.store(true, Ordering::SeqCst);
            Ok::<(), DbxError>(())
        })
        .await;
        assert!(matches!(result, Err(DbxError::Cancelled)));
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn successful_begin_skips_abort() {
        let aborted = AtomicBool::new(false);
        begin_or_abort(async { Ok::<(), DbxError>(()) }, async {
            aborted.store(true, Ordering::SeqCst);
            Ok::<(), DbxError>(())
        })
        .await
        .expect("begin");
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn abort_failure_keeps_begin_error() {
        let result = begin_or_abort(async { Err::<(), _>(DbxError::DeadlineExceeded) }, async {
            Err::<(), _>(DbxError::Other("connection lost".into()))
        })
        .await;
        assert!(matches!(result, Err(DbxError::DeadlineExceeded)));
    }

    #[test]
    fn begin_statement_variants() {
        assert_eq!(begin_statement(&TxOptions::default()), "BEGIN READ WRITE");
        assert_eq!(
            begin_statement(&TxOptions::from_options(&[
                isolation_level(IsolationLevel::Serializable),
                read_only(true),
            ])),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY"
        );
        assert_eq!(
            begin_statement(&TxOptions::from_options(&[isolation_level(
                IsolationLevel::ReadCommitted
            )])),
            "BEGIN ISOLATION LEVEL READ COMMITTED READ WRITE"
        );
    }
}
