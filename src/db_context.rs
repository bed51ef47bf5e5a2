//! The database carrier: a context that also knows which executor to use.

use std::any::TypeId;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::{self, Context, ContextRef, ContextValue};
use crate::error::DbxError;
use crate::executor::{ContextCreator, Executor};

/// Private key under which [`embed`] stores a carrier.
struct CarrierKey;

/// A context decorated with the executor that work in this scope must use.
///
/// Deadline, cancellation and value lookups are answered by the wrapped
/// parent. The executor is fixed at construction; nested scopes reuse a
/// transaction by sharing that executor, never by mutating a carrier.
#[derive(Clone)]
pub struct DbContext {
    parent: ContextRef,
    executor: Arc<dyn Executor>,
}

impl DbContext {
    /// Wrap `parent` so that it carries `executor`.
    #[must_use]
    pub fn new(parent: ContextRef, executor: Arc<dyn Executor>) -> Self {
        Self { parent, executor }
    }

    /// The executor to run statements on: the pool, or an open transaction.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    #[must_use]
    pub fn parent(&self) -> &ContextRef {
        &self.parent
    }

    /// True when the executor is a live transaction handle.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.executor().as_transactor().is_some()
    }

    /// True when both carriers hand out the very same executor instance.
    #[must_use]
    pub fn shares_executor_with(&self, other: &DbContext) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.executor), Arc::as_ptr(&other.executor))
    }
}

impl Context for DbContext {
    fn deadline(&self) -> Option<Instant> {
        self.parent.deadline()
    }

    fn cancellation(&self) -> &CancellationToken {
        self.parent.cancellation()
    }

    fn value(&self, key: TypeId) -> Option<ContextValue> {
        // Contexts derived from a carrier must still resolve to it.
        if key == TypeId::of::<CarrierKey>() {
            return Some(Arc::new(self.clone()));
        }
        self.parent.value(key)
    }

    fn err(&self) -> Option<DbxError> {
        self.parent.err()
    }

    fn as_db_context(&self) -> Option<DbContext> {
        Some(self.clone())
    }
}

impl std::fmt::Debug for DbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("in_transaction", &self.in_transaction())
            .field("deadline", &self.deadline())
            .finish_non_exhaustive()
    }
}

impl From<DbContext> for ContextRef {
    fn from(ctx: DbContext) -> Self {
        Arc::new(ctx)
    }
}

impl From<&DbContext> for ContextRef {
    fn from(ctx: &DbContext) -> Self {
        Arc::new(ctx.clone())
    }
}

/// Attach `carrier` to a plain context; only [`extract`] can read it back.
#[must_use]
pub fn embed(parent: &ContextRef, carrier: DbContext) -> ContextRef {
    context::with_value::<CarrierKey, DbContext>(parent, carrier)
}

/// Find the carrier for `ctx`.
///
/// The context itself is tried first (a carrier passed straight through),
/// then the value installed by [`embed`]. `None` is an ordinary outcome.
#[must_use]
pub fn extract(ctx: &dyn Context) -> Option<DbContext> {
    ctx.as_db_context().or_else(|| {
        context::value::<CarrierKey, DbContext>(ctx).map(|carrier| carrier.as_ref().clone())
    })
}

/// The carrier for `ctx`, or a fresh one from `creator` when there is none.
#[must_use]
pub fn resolve<C>(ctx: &ContextRef, creator: &C) -> DbContext
where
    C: ContextCreator + ?Sized,
{
    extract(ctx.as_ref()).unwrap_or_else(|| creator.context(Arc::clone(ctx)))
}

/// True when `ctx` is itself a carrier (embedded carriers do not count).
#[must_use]
pub fn is(ctx: &dyn Context) -> bool {
    ctx.as_db_context().is_some()
}

/// The carrier for `ctx`, for code paths that cannot run without one.
///
/// # Errors
/// Returns [`DbxError::InvalidContext`] when neither `ctx` nor any of its
/// ancestors carries an executor.
pub fn require(ctx: &dyn Context) -> Result<DbContext, DbxError> {
    extract(ctx).ok_or_else(|| {
        DbxError::InvalidContext("context does not carry a database executor".into())
    })
}
