//! Change feed types.

use crate::types::{Bookmark, BookmarkId, UserId};
use serde::{Deserialize, Serialize};

/// Configuration for a feed subscription.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1024
    pub buffer_size: usize,

    /// Channel names are `{channel_prefix}-{identity}`.
    /// Default: "bookmarks"
    pub channel_prefix: String,

    /// Filter delete notifications by the owner of the deleted row.
    ///
    /// Off by default: a feed that only filters on new-row state cannot
    /// scope deletes, so every delete is delivered and ids the receiver
    /// does not hold are ignored downstream.
    pub filter_deletes: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            channel_prefix: "bookmarks".to_string(),
            filter_deletes: false,
        }
    }
}

impl FeedConfig {
    pub fn channel_name(&self, user: &UserId) -> String {
        format!("{}-{}", self.channel_prefix, user)
    }
}

/// Which rows a subscription receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedFilter {
    /// Inserts and updates are delivered only for rows owned by this identity.
    pub owner: UserId,

    /// Whether deletes are scoped to `owner` as well.
    pub filter_deletes: bool,
}

impl FeedFilter {
    pub fn for_owner(owner: UserId, config: &FeedConfig) -> Self {
        Self {
            owner,
            filter_deletes: config.filter_deletes,
        }
    }

    pub(crate) fn matches_row(&self, row: &Bookmark) -> bool {
        row.user_id == self.owner
    }

    /// `previous_owner` is the owner of the row before deletion, if the
    /// producer knows it.
    pub(crate) fn matches_delete(&self, previous_owner: Option<&UserId>) -> bool {
        if !self.filter_deletes {
            return true;
        }
        previous_owner.map_or(true, |owner| *owner == self.owner)
    }
}

/// Events delivered on a feed subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A row was inserted.
    Inserted { record: Bookmark },

    /// A row was updated. Carries the full new row.
    Updated { record: Bookmark },

    /// A row was deleted. Only the id is known.
    Deleted { id: BookmarkId },

    /// The subscription ended.
    Dropped { reason: DropReason },
}

impl FeedEvent {
    pub fn inserted(record: Bookmark) -> Self {
        FeedEvent::Inserted { record }
    }

    pub fn updated(record: Bookmark) -> Self {
        FeedEvent::Updated { record }
    }

    pub fn deleted(id: BookmarkId) -> Self {
        FeedEvent::Deleted { id }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The channel was lost.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// Internal error.
    Error(String),
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of one subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel name, `{prefix}-{identity}`.
    pub channel: String,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<FeedEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<FeedEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
