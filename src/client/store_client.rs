//! Record store client.

use super::remote::{RemoteError, RemoteStore};
use crate::error::{Result, SyncError};
use crate::types::{Bookmark, BookmarkId, BookmarkInsert, BookmarkUpdate, UserId};
use std::sync::Arc;
use tracing::debug;

/// Thin wrapper over a [`RemoteStore`] that surfaces every failure as
/// [`SyncError::Store`].
///
/// No retries happen here; a transport that wants backoff implements it
/// below the [`RemoteStore`] boundary.
#[derive(Clone)]
pub struct BookmarkClient {
    remote: Arc<dyn RemoteStore>,
}

impl BookmarkClient {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// All bookmarks owned by `caller`, newest first.
    pub fn list(&self, caller: &UserId) -> Result<Vec<Bookmark>> {
        let mut rows = self.remote.select(caller).map_err(store_error)?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(user = %caller, count = rows.len(), "listed bookmarks");
        Ok(rows)
    }

    /// Insert a bookmark and return the persisted row.
    pub fn create(&self, caller: &UserId, title: &str, url: &str) -> Result<Bookmark> {
        let row = BookmarkInsert::new(title, url);
        self.remote.insert(caller, &row).map_err(store_error)
    }

    /// Merge-patch a bookmark and return the persisted row.
    pub fn update(
        &self,
        caller: &UserId,
        id: &BookmarkId,
        patch: &BookmarkUpdate,
    ) -> Result<Bookmark> {
        self.remote.update(caller, id, patch).map_err(store_error)
    }

    /// Delete a bookmark. A missing row counts as success.
    pub fn remove(&self, caller: &UserId, id: &BookmarkId) -> Result<()> {
        match self.remote.delete(caller, id) {
            Ok(()) => Ok(()),
            Err(RemoteError::NoMatchingRow) => {
                debug!(%id, "delete matched no row");
                Ok(())
            }
            Err(e) => Err(store_error(e)),
        }
    }
}

fn store_error(e: RemoteError) -> SyncError {
    SyncError::Store(e.to_string())
}
