//! Recording test doubles for code built on the executor traits.
//!
//! [`MockDatabase`] hands out [`MockTransactor`]s with increasing ids and
//! writes every call into a shared [`Journal`], so tests can assert the exact
//! begin / statement / commit / rollback sequence. Failures can be injected
//! for begin, commit, rollback and individual statements.

mod journal;
mod mock;

pub use journal::{Event, Journal, Target};
pub use mock::{MockDatabase, MockTransactor};
