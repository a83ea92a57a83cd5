//! Reconciliation of local bookmarks with the remote store.
//!
//! The [`Reconciler`] owns the canonical in-memory [`Collection`] and moves
//! through [`Phase`]s as the identity changes. Edits and removals apply
//! locally first; failures re-list from the store. Feed events merge
//! idempotently, and results from a previous identity epoch are dropped.

mod collection;
mod store;
mod worker;

pub use collection::Collection;
pub(crate) use store::Inner;
pub use store::{FeedDelivery, Phase, Reconciler, ReconcilerConfig};
