//! Owned subscription to one identity's changes.

use crate::error::Result;
use crate::types::UserId;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::info;

use super::broker::ChangeFeed;
use super::types::{FeedConfig, FeedEvent, SubscriptionId};

/// A live subscription bound to one identity.
///
/// Closes its underlying channel exactly once: either through
/// [`FeedSubscription::close`] or on drop.
pub struct FeedSubscription {
    feed: Arc<dyn ChangeFeed>,
    user: UserId,
    id: SubscriptionId,
    channel: String,
    receiver: Receiver<FeedEvent>,
    closed: bool,
}

impl FeedSubscription {
    /// Open a subscription for `user`.
    pub fn open(feed: Arc<dyn ChangeFeed>, user: &UserId, config: &FeedConfig) -> Result<Self> {
        let handle = feed.subscribe(user, config)?;
        info!(user = %user, channel = %handle.channel, "subscribed to change feed");

        Ok(Self {
            feed,
            user: user.clone(),
            id: handle.id,
            channel: handle.channel,
            receiver: handle.receiver,
            closed: false,
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The event stream. Cloning the receiver shares the same queue.
    pub fn receiver(&self) -> &Receiver<FeedEvent> {
        &self.receiver
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the underlying channel. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.feed.unsubscribe(self.id);
        info!(user = %self.user, channel = %self.channel, "closed change feed subscription");
        true
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
