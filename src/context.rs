//! Request-scoped contexts: deadline, cancellation and typed values.
//!
//! A [`Context`] travels down a call chain the way a request does. Every
//! derived context inherits its parent's cancellation, the earlier of the two
//! deadlines, and all values installed further up. The database carrier
//! ([`crate::DbContext`]) is itself a `Context`, so anything that accepts one
//! accepts the other.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::db_context::DbContext;
use crate::error::DbxError;

/// Shared handle to any context.
pub type ContextRef = Arc<dyn Context>;

/// Value stored under a key type by [`with_value`].
pub type ContextValue = Arc<dyn Any + Send + Sync>;

pub trait Context: Send + Sync {
    /// Point in time after which work done on behalf of this context should stop.
    fn deadline(&self) -> Option<Instant>;

    /// Token cancelled when this context, or any of its ancestors, is cancelled.
    fn cancellation(&self) -> &CancellationToken;

    /// Look up the value installed under `key`, searching outwards through parents.
    fn value(&self, key: TypeId) -> Option<ContextValue>;

    /// Why the context is finished, or `None` while it is still live.
    fn err(&self) -> Option<DbxError> {
        if self.cancellation().is_cancelled() {
            return Some(DbxError::Cancelled);
        }
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Some(DbxError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Direct carrier test: `Some` only when this context *is* a database carrier.
    fn as_db_context(&self) -> Option<DbContext> {
        None
    }
}

/// Plain context node produced by the constructors in this module.
pub struct BaseContext {
    parent: Option<ContextRef>,
    token: CancellationToken,
    deadline: Option<Instant>,
    entry: Option<(TypeId, ContextValue)>,
}

impl BaseContext {
    fn child(parent: &ContextRef) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            token: parent.cancellation().child_token(),
            deadline: parent.deadline(),
            entry: None,
        }
    }
}

impl Context for BaseContext {
    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    fn value(&self, key: TypeId) -> Option<ContextValue> {
        if let Some((entry_key, value)) = &self.entry
            && *entry_key == key
        {
            return Some(Arc::clone(value));
        }
        self.parent.as_ref().and_then(|parent| parent.value(key))
    }
}

impl std::fmt::Debug for BaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseContext")
            .field("deadline", &self.deadline)
            .field("cancelled", &self.token.is_cancelled())
            .field("has_value", &self.entry.is_some())
            .finish_non_exhaustive()
    }
}

/// Empty root context: never cancelled, no deadline, no values.
#[must_use]
pub fn background() -> ContextRef {
    Arc::new(BaseContext {
        parent: None,
        token: CancellationToken::new(),
        deadline: None,
        entry: None,
    })
}

/// Derive a context together with the token that cancels it (and its descendants only).
#[must_use]
pub fn with_cancel(parent: &ContextRef) -> (ContextRef, CancellationToken) {
    let ctx = BaseContext::child(parent);
    let token = ctx.token.clone();
    (Arc::new(ctx), token)
}

/// Derive a context whose deadline is the earlier of `deadline` and the parent's.
#[must_use]
pub fn with_deadline(parent: &ContextRef, deadline: Instant) -> (ContextRef, CancellationToken) {
    let mut ctx = BaseContext::child(parent);
    ctx.deadline = Some(ctx.deadline.map_or(deadline, |inherited| inherited.min(deadline)));
    let token = ctx.token.clone();
    (Arc::new(ctx), token)
}

#[must_use]
pub fn with_timeout(parent: &ContextRef, timeout: Duration) -> (ContextRef, CancellationToken) {
    with_deadline(parent, Instant::now() + timeout)
}

/// Derive a context carrying `value` under the key type `K`.
///
/// Keys are types rather than strings, so two libraries can only collide by
/// sharing a type. Use a private zero-sized struct as the key.
#[must_use]
pub fn with_value<K: 'static, V: Any + Send + Sync>(parent: &ContextRef, value: V) -> ContextRef {
    let mut ctx = BaseContext::child(parent);
    ctx.entry = Some((TypeId::of::<K>(), Arc::new(value)));
    Arc::new(ctx)
}

/// Typed lookup of a value installed with [`with_value`].
#[must_use]
pub fn value<K: 'static, V: Any + Send + Sync>(ctx: &dyn Context) -> Option<Arc<V>> {
    ctx.value(TypeId::of::<K>())?.downcast::<V>().ok()
}

/// Resolve once `ctx` is cancelled or its deadline passes, yielding the reason.
pub async fn done(ctx: &dyn Context) -> DbxError {
    let token = ctx.cancellation();
    match ctx.deadline() {
        Some(deadline) => tokio::select! {
            () = token.cancelled() => DbxError::Cancelled,
            () = tokio::time::sleep_until(deadline) => DbxError::DeadlineExceeded,
        },
        None => {
            token.cancelled().await;
            DbxError::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RequestId;
    struct Tenant;

    #[test]
    fn background_is_live() {
        let ctx = background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        assert!(ctx.as_db_context().is_none());
    }

    #[test]
    fn values_are_found_through_parents() {
        let root = background();
        let with_id = with_value::<RequestId, _>(&root, 42_u32);
        let (child, _cancel) = with_cancel(&with_id);
        let leaf = with_value::<Tenant, _>(&child, "acme".to_string());

        assert_eq!(value::<RequestId, u32>(&*leaf).as_deref(), Some(&42));
        assert_eq!(
            value::<Tenant, String>(&*leaf).as_deref().map(String::as_str),
            Some("acme")
        );
        assert!(value::<Tenant, String>(&*with_id).is_none());
        // wrong value type under a known key
        assert!(value::<RequestId, String>(&*leaf).is_none());
    }

    #[test]
    fn inner_values_shadow_outer_ones() {
        let root = background();
        let outer = with_value::<RequestId, _>(&root, 1_u32);
        let inner = with_value::<RequestId, _>(&outer, 2_u32);
        assert_eq!(value::<RequestId, u32>(&*inner).as_deref(), Some(&2));
        assert_eq!(value::<RequestId, u32>(&*outer).as_deref(), Some(&1));
    }

    #[test]
    fn cancellation_flows_down_not_up() {
        let root = background();
        let (parent, cancel_parent) = with_cancel(&root);
        let (child, cancel_child) = with_cancel(&parent);

        cancel_child.cancel();
        assert!(matches!(child.err(), Some(DbxError::Cancelled)));
        assert!(parent.err().is_none());

        let (other_child, _) = with_cancel(&parent);
        cancel_parent.cancel();
        assert!(matches!(other_child.err(), Some(DbxError::Cancelled)));
    }

    #[test]
    fn child_keeps_earlier_deadline() {
        let root = background();
        let soon = Instant::now() + Duration::from_secs(5);
        let (parent, _) = with_deadline(&root, soon);
        let (child, _) = with_timeout(&parent, Duration::from_secs(60));
        assert_eq!(child.deadline(), Some(soon));
    }

    #[tokio::test]
    async fn done_reports_deadline() {
        let root = background();
        let (ctx, _) = with_timeout(&root, Duration::from_millis(10));
        let reason = done(&*ctx).await;
        assert!(matches!(reason, DbxError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(DbxError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn done_reports_cancellation() {
        let root = background();
        let (ctx, cancel) = with_cancel(&root);
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { done(&*ctx).await })
        };
        cancel.cancel();
        let reason = waiter.await.expect("join");
        assert!(matches!(reason, DbxError::Cancelled));
    }
}
