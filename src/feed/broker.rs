//! Feed broker: the producer side of change notifications.

use crate::error::Result;
use crate::types::{Bookmark, BookmarkId, UserId};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{DropReason, FeedConfig, FeedEvent, FeedFilter, SubscriptionHandle, SubscriptionId};

/// Source of change notifications, scoped per identity.
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription delivering changes to `user`'s rows.
    fn subscribe(&self, user: &UserId, config: &FeedConfig) -> Result<SubscriptionHandle>;

    /// Close a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Internal subscription state.
struct Subscription {
    channel: String,
    filter: FeedFilter,
    sender: Sender<FeedEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, event: FeedEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and broadcasts row changes.
pub struct FeedBroker {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl FeedBroker {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription for `filter` and return its receiving end.
    pub fn open(&self, channel: String, filter: FeedFilter, buffer_size: usize) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(buffer_size.max(1));

        debug!(?id, %channel, "feed subscription opened");
        self.subscriptions.write().insert(
            id,
            Subscription {
                channel: channel.clone(),
                filter,
                sender,
            },
        );

        SubscriptionHandle {
            id,
            channel,
            receiver,
        }
    }

    /// Remove a subscription, telling the receiver why.
    pub fn close(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            debug!(?id, channel = %sub.channel, "feed subscription closed");
            // Best effort; the receiver may already be gone.
            let _ = sub.sender.try_send(FeedEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    /// Broadcast an inserted row to subscribers that own it.
    pub fn broadcast_insert(&self, row: &Bookmark) {
        self.broadcast(|sub| sub.filter.matches_row(row), FeedEvent::inserted(row.clone()));
    }

    /// Broadcast an updated row to subscribers that own it.
    pub fn broadcast_update(&self, row: &Bookmark) {
        self.broadcast(|sub| sub.filter.matches_row(row), FeedEvent::updated(row.clone()));
    }

    /// Broadcast a delete. Unless a subscription filters deletes, every
    /// subscriber receives it.
    pub fn broadcast_delete(&self, id: &BookmarkId, previous_owner: Option<&UserId>) {
        self.broadcast(
            |sub| sub.filter.matches_delete(previous_owner),
            FeedEvent::deleted(id.clone()),
        );
    }

    /// Drop every subscription with the given reason.
    pub fn disconnect_all(&self, reason: DropReason) {
        let mut subs = self.subscriptions.write();
        for (id, sub) in subs.drain() {
            debug!(?id, channel = %sub.channel, "feed subscription disconnected");
            let _ = sub.sender.try_send(FeedEvent::Dropped {
                reason: reason.clone(),
            });
        }
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast<F>(&self, filter: F, event: FeedEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(?id, channel = %sub.channel, "dropping slow feed subscriber");
                    // Buffer is usually still full here, so this rarely lands.
                    let _ = sub.sender.try_send(FeedEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for FeedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for FeedBroker {
    fn subscribe(&self, user: &UserId, config: &FeedConfig) -> Result<SubscriptionHandle> {
        let filter = FeedFilter::for_owner(user.clone(), config);
        Ok(self.open(config.channel_name(user), filter, config.buffer_size))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.close(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use std::time::Duration;

    fn row(id: &str, owner: &str) -> Bookmark {
        Bookmark {
            id: BookmarkId::new(id),
            title: "t".into(),
            url: "https://example.com".into(),
            user_id: UserId::new(owner),
            created_at: Timestamp(1),
        }
    }

    fn subscribe(broker: &FeedBroker, user: &str, config: &FeedConfig) -> SubscriptionHandle {
        broker.subscribe(&UserId::new(user), config).unwrap()
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let broker = FeedBroker::new();
        let handle = subscribe(&broker, "user-1", &FeedConfig::default());
        assert_eq!(handle.channel, "bookmarks-user-1");
        assert_eq!(broker.subscription_count(), 1);

        broker.unsubscribe(handle.id);
        assert_eq!(broker.subscription_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(
            event,
            FeedEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_inserts_scoped_to_owner() {
        let broker = FeedBroker::new();
        let mine = subscribe(&broker, "user-1", &FeedConfig::default());
        let theirs = subscribe(&broker, "user-2", &FeedConfig::default());

        broker.broadcast_insert(&row("1", "user-1"));
        broker.broadcast_update(&row("1", "user-1"));

        assert!(matches!(mine.try_recv(), Ok(FeedEvent::Inserted { .. })));
        assert!(matches!(mine.try_recv(), Ok(FeedEvent::Updated { .. })));
        assert!(theirs.try_recv().is_err());
    }

    #[test]
    fn test_deletes_unfiltered_by_default() {
        let broker = FeedBroker::new();
        let mine = subscribe(&broker, "user-1", &FeedConfig::default());
        let theirs = subscribe(&broker, "user-2", &FeedConfig::default());

        broker.broadcast_delete(&BookmarkId::new("1"), Some(&UserId::new("user-1")));

        assert!(matches!(mine.try_recv(), Ok(FeedEvent::Deleted { .. })));
        assert!(matches!(theirs.try_recv(), Ok(FeedEvent::Deleted { .. })));
    }

    #[test]
    fn test_filtered_deletes() {
        let broker = FeedBroker::new();
        let config = FeedConfig {
            filter_deletes: true,
            ..Default::default()
        };
        let mine = subscribe(&broker, "user-1", &config);
        let theirs = subscribe(&broker, "user-2", &config);

        broker.broadcast_delete(&BookmarkId::new("1"), Some(&UserId::new("user-1")));
        assert!(mine.try_recv().is_ok());
        assert!(theirs.try_recv().is_err());

        // Without prior row state the delete cannot be scoped.
        broker.broadcast_delete(&BookmarkId::new("2"), None);
        assert!(theirs.try_recv().is_ok());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let broker = FeedBroker::new();
        let config = FeedConfig {
            buffer_size: 2,
            ..Default::default()
        };
        let _handle = subscribe(&broker, "user-1", &config);

        for i in 0..10 {
            broker.broadcast_insert(&row(&i.to_string(), "user-1"));
        }

        assert_eq!(broker.subscription_count(), 0);
    }
}
