//! Background delivery of feed events into the reconciler.

use crate::feed::FeedEvent;
use crossbeam_channel::Receiver;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use tracing::debug;

use super::store::Inner;

/// Thread draining one subscription's channel.
///
/// Exits when the channel disconnects, when the subscription reports
/// `Dropped`, when the reconciler is gone, or when its generation is stale.
pub(crate) struct FeedWorker {
    handle: JoinHandle<()>,
}

impl FeedWorker {
    pub(crate) fn spawn(
        inner: Weak<Inner>,
        generation: u64,
        channel: &str,
        receiver: Receiver<FeedEvent>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("feed-{}", channel))
            .spawn(move || run(inner, generation, receiver))?;
        Ok(Self { handle })
    }

    /// Wait for the thread to exit. Its channel must already be closed.
    pub(crate) fn join(self) {
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        let _ = self.handle.join();
    }
}

fn run(inner: Weak<Inner>, generation: u64, receiver: Receiver<FeedEvent>) {
    for event in receiver.iter() {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.apply_feed_event(generation, event) {
            debug!(generation, "feed worker stopping");
            return;
        }
    }

    // Sender gone without a Dropped event, e.g. the broker evicted us.
    if let Some(inner) = inner.upgrade() {
        inner.feed_disconnected(generation);
    }
}
