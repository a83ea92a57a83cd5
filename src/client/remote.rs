//! The remote record store as seen over the wire.

use crate::types::{Bookmark, BookmarkId, BookmarkInsert, BookmarkUpdate, UserId};
use thiserror::Error;

/// Failure reported by a remote store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("no matching row")]
    NoMatchingRow,

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Request/response access to the bookmarks table.
///
/// Every call carries the caller's identity; the store applies its own
/// access policy and only ever exposes rows owned by the caller.
pub trait RemoteStore: Send + Sync {
    /// All rows visible to `caller`.
    fn select(&self, caller: &UserId) -> Result<Vec<Bookmark>, RemoteError>;

    /// Insert one row. The store assigns id, owner and timestamp.
    fn insert(&self, caller: &UserId, row: &BookmarkInsert) -> Result<Bookmark, RemoteError>;

    /// Merge-patch one row and return it.
    fn update(
        &self,
        caller: &UserId,
        id: &BookmarkId,
        patch: &BookmarkUpdate,
    ) -> Result<Bookmark, RemoteError>;

    /// Delete one row.
    fn delete(&self, caller: &UserId, id: &BookmarkId) -> Result<(), RemoteError>;
}
