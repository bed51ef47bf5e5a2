//! Reuse-or-begin transaction orchestration.
//!
//! ```rust,no_run
//! use sql_dbx::prelude::*;
//!
//! # async fn demo(db: SqliteDatabase) -> Result<(), DbxError> {
//! let user_id = transaction_with_result(background(), &db, |ctx| async move {
//!     let tx = ctx.executor();
//!     let res = tx
//!         .execute_context(&ctx, "INSERT INTO users (name) VALUES (?1)", &[RowValues::Text("ann".into())])
//!         .await?;
//!     Ok::<_, DbxError>(res.last_insert_id)
//! }, &[])
//! .await?;
//! # let _ = user_id;
//! # Ok(()) }
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::ContextRef;
use crate::db_context::{self, DbContext};
use crate::error::DbxError;
use crate::executor::{Beginner, ContextCreator, Transactor};
use crate::options::{TxOption, TxOptions};

/// Run `op` inside a transaction.
///
/// When `ctx` already carries an open transaction (and
/// [`crate::options::new_transaction`] is not given) that transaction is
/// reused and left for its owner to finish. The operation still runs under
/// `ctx`, so its deadline and cancellation apply. Otherwise a new one is begun,
/// committed when `op` succeeds and rolled back when it fails.
///
/// # Errors
/// [`DbxError::Begin`] or [`DbxError::Commit`] converted into `E`, or the
/// error returned by `op`, unchanged.
pub async fn transaction<C, D, F, Fut, E>(
    ctx: C,
    db: &D,
    op: F,
    options: &[TxOption],
) -> Result<(), E>
where
    C: Into<ContextRef>,
    D: Beginner + ContextCreator + ?Sized,
    F: FnOnce(DbContext) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<DbxError>,
{
    run(ctx.into(), db, op, TxOptions::from_options(options)).await
}

/// Like [`transaction`], for operations that produce a value.
///
/// # Errors
/// Same as [`transaction`]; no value is returned on any failure path.
pub async fn transaction_with_result<T, C, D, F, Fut, E>(
    ctx: C,
    db: &D,
    op: F,
    options: &[TxOption],
) -> Result<T, E>
where
    C: Into<ContextRef>,
    D: Beginner + ContextCreator + ?Sized,
    F: FnOnce(DbContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbxError>,
{
    run(ctx.into(), db, op, TxOptions::from_options(options)).await
}

async fn run<T, D, F, Fut, E>(ctx: ContextRef, db: &D, op: F, options: TxOptions) -> Result<T, E>
where
    D: Beginner + ContextCreator + ?Sized,
    F: FnOnce(DbContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbxError>,
{
    let reusable = if options.new_transaction {
        None
    } else {
        let carrier = db_context::resolve(&ctx, db);
        carrier.in_transaction().then_some(carrier)
    };

    // `owned` is Some only when this call began the transaction.
    let (carrier, owned): (DbContext, Option<Arc<dyn Transactor>>) = match reusable {
        Some(found) => {
            debug!("reusing transaction carried by context");
            // Keep the caller's deadline and cancellation; only the executor is shared.
            (DbContext::new(ctx, found.executor()), None)
        }
        None => {
            let tx = db
                .begin_transaction(ctx.as_ref(), &options)
                .await
                .map_err(|e| E::from(DbxError::Begin(Box::new(e))))?;
            debug!(
                isolation = ?options.isolation,
                read_only = options.read_only,
                forced = options.new_transaction,
                "began transaction"
            );
            let carrier = DbContext::new(ctx, tx.clone());
            (carrier, Some(tx))
        }
    };

    let outcome = op(carrier).await;

    let Some(tx) = owned else {
        return outcome;
    };

    match outcome {
        Ok(out) => {
            tx.commit()
                .await
                .map_err(|e| E::from(DbxError::Commit(Box::new(e))))?;
            debug!("committed transaction");
            Ok(out)
        }
        Err(err) => {
            // The operation's error is the one reported.
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed operation also failed");
            } else {
                debug!("rolled back transaction");
            }
            Err(err)
        }
    }
}
