//! In-process backend implementing both the record store and its change feed.

use crate::client::{RemoteError, RemoteStore};
use crate::error::{Result, SyncError};
use crate::feed::{ChangeFeed, DropReason, FeedBroker, FeedConfig, SubscriptionHandle, SubscriptionId};
use crate::types::{Bookmark, BookmarkId, BookmarkInsert, BookmarkUpdate, Timestamp, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

struct Rows {
    by_id: HashMap<BookmarkId, Bookmark>,
    next_id: u64,
    last_created: Timestamp,
}

/// Owner-scoped bookmark table with a change feed.
///
/// Every successful write is broadcast to feed subscribers before the call
/// returns, in write order.
pub struct MemoryBackend {
    /// Rows and id/timestamp allocation. Held across broadcast so feed
    /// order matches write order.
    rows: Mutex<Rows>,
    broker: FeedBroker,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Rows {
                by_id: HashMap::new(),
                next_id: 1,
                last_created: Timestamp(0),
            }),
            broker: FeedBroker::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Take the backend offline (or back online). While offline every store
    /// call fails with a transport error, new subscriptions are refused and
    /// existing ones are disconnected.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.broker.disconnect_all(DropReason::Disconnected);
        }
    }

    pub fn broker(&self) -> &FeedBroker {
        &self.broker
    }

    /// Number of rows across all owners.
    pub fn row_count(&self) -> usize {
        self.rows.lock().by_id.len()
    }

    /// Direct row lookup, bypassing access policy.
    pub fn row(&self, id: &BookmarkId) -> Option<Bookmark> {
        self.rows.lock().by_id.get(id).cloned()
    }

    fn check_available(&self) -> std::result::Result<(), RemoteError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Transport("store unavailable".into()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryBackend {
    fn select(&self, caller: &UserId) -> std::result::Result<Vec<Bookmark>, RemoteError> {
        self.check_available()?;
        let rows = self.rows.lock();
        let mut owned: Vec<Bookmark> = rows
            .by_id
            .values()
            .filter(|b| b.user_id == *caller)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    fn insert(&self, caller: &UserId, row: &BookmarkInsert) -> std::result::Result<Bookmark, RemoteError> {
        self.check_available()?;
        if row.url.trim().is_empty() {
            return Err(RemoteError::Invalid("url must not be empty".into()));
        }

        let mut rows = self.rows.lock();
        let id = BookmarkId(format!("bm-{}", rows.next_id));
        rows.next_id += 1;

        // Strictly increasing so newest-first ordering is total.
        let now = Timestamp::now();
        let created_at = if now > rows.last_created {
            now
        } else {
            Timestamp(rows.last_created.0 + 1)
        };
        rows.last_created = created_at;

        let bookmark = Bookmark {
            id: id.clone(),
            title: row.title.clone(),
            url: row.url.clone(),
            user_id: caller.clone(),
            created_at,
        };
        rows.by_id.insert(id, bookmark.clone());
        debug!(id = %bookmark.id, user = %caller, "inserted row");

        self.broker.broadcast_insert(&bookmark);
        Ok(bookmark)
    }

    fn update(
        &self,
        caller: &UserId,
        id: &BookmarkId,
        patch: &BookmarkUpdate,
    ) -> std::result::Result<Bookmark, RemoteError> {
        self.check_available()?;
        let mut rows = self.rows.lock();
        let row = rows.by_id.get_mut(id).ok_or(RemoteError::NoMatchingRow)?;
        if row.user_id != *caller {
            return Err(RemoteError::AccessDenied(format!("{} is not owned by {}", id, caller)));
        }
        if matches!(patch.url, Some(ref url) if url.trim().is_empty()) {
            return Err(RemoteError::Invalid("url must not be empty".into()));
        }

        row.apply(patch);
        let updated = row.clone();
        debug!(%id, user = %caller, "updated row");

        self.broker.broadcast_update(&updated);
        Ok(updated)
    }

    fn delete(&self, caller: &UserId, id: &BookmarkId) -> std::result::Result<(), RemoteError> {
        self.check_available()?;
        let mut rows = self.rows.lock();
        // Rows owned by someone else are invisible to the caller.
        match rows.by_id.get(id) {
            Some(row) if row.user_id == *caller => {}
            _ => return Err(RemoteError::NoMatchingRow),
        }
        rows.by_id.remove(id);
        debug!(%id, user = %caller, "deleted row");

        self.broker.broadcast_delete(id, Some(caller));
        Ok(())
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe(&self, user: &UserId, config: &FeedConfig) -> Result<SubscriptionHandle> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::Subscription("feed unavailable".into()));
        }
        self.broker.subscribe(user, config)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.broker.unsubscribe(id);
    }
}
