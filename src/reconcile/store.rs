//! The reconciling store: local bookmarks kept in step with the remote store.

use crate::client::{BookmarkClient, RemoteStore};
use crate::error::{Result, SyncError};
use crate::feed::{ChangeFeed, FeedConfig, FeedEvent, FeedSubscription};
use crate::types::{Bookmark, BookmarkId, BookmarkUpdate, UserId};
use crossbeam_channel::TryRecvError;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::collection::Collection;
use super::worker::FeedWorker;

/// How feed events reach the collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeedDelivery {
    /// A worker thread per subscription applies events as they arrive.
    #[default]
    Background,
    /// Events queue until [`Reconciler::drain_feed`] is called.
    Manual,
}

/// Reconciler configuration.
#[derive(Clone, Debug, Default)]
pub struct ReconcilerConfig {
    pub delivery: FeedDelivery,

    pub feed: FeedConfig,

    /// Also merge the direct responses of `add_bookmark` and `edit_bookmark`
    /// through the feed merge policy. Default: false (the feed alone
    /// reconciles).
    pub merge_responses: bool,
}

/// Lifecycle of the reconciler for the current identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No identity.
    Uninitialized,
    /// Identity present, initial list in flight.
    Loading,
    /// Collection populated.
    Ready,
    /// The last list or mutation failed. The collection is kept.
    Error,
}

struct State {
    phase: Phase,
    /// Bumped on every identity transition. Results carry the epoch they
    /// were issued in and are discarded once it moves on.
    epoch: u64,
    identity: Option<UserId>,
    collection: Collection,
    last_error: Option<SyncError>,
    /// Subscription failures are tracked apart so a later successful list
    /// does not hide them.
    feed_error: Option<SyncError>,
    subscription: Option<FeedSubscription>,
    worker: Option<FeedWorker>,
    /// Bumped whenever a subscription opens or goes away. Workers carry the
    /// generation they serve, so a detached worker never touches a newer
    /// subscription of the same identity.
    feed_generation: u64,
    /// Tickets order overlapping list requests within an epoch; only a list
    /// newer than the last applied one may replace the collection.
    next_list_ticket: u64,
    applied_list_ticket: u64,
}

impl State {
    fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            epoch: 0,
            identity: None,
            collection: Collection::new(),
            last_error: None,
            feed_error: None,
            subscription: None,
            worker: None,
            feed_generation: 0,
            next_list_ticket: 0,
            applied_list_ticket: 0,
        }
    }

    fn issue_list(&mut self) -> u64 {
        self.next_list_ticket += 1;
        self.next_list_ticket
    }

    fn current_user(&self) -> Result<UserId> {
        self.identity.clone().ok_or(SyncError::NoIdentity)
    }
}

pub(crate) struct Inner {
    client: BookmarkClient,
    feed: Arc<dyn ChangeFeed>,
    config: ReconcilerConfig,
    state: Mutex<State>,
}

/// Local bookmark collection synchronized with a remote store and its
/// change feed.
///
/// Mutations block the calling thread for the remote round-trip only; no
/// internal lock is held meanwhile, so calls from other threads and feed
/// delivery proceed concurrently.
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: BookmarkClient::new(remote),
                feed,
                config,
                state: Mutex::new(State::new()),
            }),
        }
    }

    /// Switch to a new identity (or none).
    ///
    /// Tears down the previous identity's subscription before opening the
    /// next one, then loads the collection. Setting the current identity
    /// again only reopens a lost subscription and re-lists, keeping the
    /// collection meanwhile.
    pub fn set_identity(&self, identity: Option<UserId>) {
        self.inner.set_identity(identity);
    }

    /// Create a bookmark. The row appears through the change feed.
    pub fn add_bookmark(&self, title: &str, url: &str) -> Result<Bookmark> {
        self.inner.add_bookmark(title, url)
    }

    /// Edit a bookmark, showing the edit locally before the store confirms.
    pub fn edit_bookmark(&self, id: &BookmarkId, updates: &BookmarkUpdate) -> Result<Bookmark> {
        self.inner.edit_bookmark(id, updates)
    }

    /// Remove a bookmark, hiding it locally before the store confirms.
    pub fn remove_bookmark(&self, id: &BookmarkId) -> Result<()> {
        self.inner.remove_bookmark(id)
    }

    /// Re-list and replace the collection.
    pub fn refresh(&self) -> Result<()> {
        self.inner.refresh()
    }

    /// Apply every queued feed event. Returns how many were applied.
    pub fn drain_feed(&self) -> usize {
        self.inner.drain_feed()
    }

    /// Drop the identity: closes the subscription and clears state.
    pub fn shutdown(&self) {
        self.inner.set_identity(None);
    }

    // --- Accessors ---

    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.inner.state.lock().collection.items().to_vec()
    }

    pub fn get(&self, id: &BookmarkId) -> Option<Bookmark> {
        self.inner.state.lock().collection.get(id).cloned()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    pub fn last_error(&self) -> Option<SyncError> {
        let state = self.inner.state.lock();
        state.last_error.clone().or_else(|| state.feed_error.clone())
    }

    pub fn identity(&self) -> Option<UserId> {
        self.inner.state.lock().identity.clone()
    }

    /// Whether a feed subscription is currently open.
    pub fn is_subscribed(&self) -> bool {
        self.inner.state.lock().subscription.is_some()
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.inner.set_identity(None);
    }
}

impl Inner {
    pub(crate) fn set_identity(self: &Arc<Self>, identity: Option<UserId>) {
        let (old_worker, load) = {
            let mut state = self.state.lock();
            if state.identity == identity {
                let reopened = self.reopen_lost_subscription(&mut state);
                drop(state);
                if reopened {
                    // Catch up on whatever the feed missed while it was down.
                    if let Err(e) = self.refresh() {
                        warn!(error = %e, "catch-up list failed");
                    }
                }
                return;
            }
            info!(from = ?state.identity, to = ?identity, "identity changed");

            state.epoch += 1;
            // Close before anything new opens.
            let old_worker = state.worker.take();
            if let Some(mut sub) = state.subscription.take() {
                sub.close();
            }
            state.feed_generation += 1;
            state.collection.clear();
            state.last_error = None;
            state.feed_error = None;
            state.identity = identity.clone();

            let load = match identity {
                None => {
                    state.phase = Phase::Uninitialized;
                    None
                }
                Some(user) => {
                    state.phase = Phase::Loading;
                    self.open_subscription(&mut state, &user);
                    let ticket = state.issue_list();
                    Some((user, state.epoch, ticket))
                }
            };
            (old_worker, load)
        };

        if let Some(worker) = old_worker {
            worker.join();
        }

        if let Some((user, epoch, ticket)) = load {
            let result = self.client.list(&user);
            self.apply_initial_list(epoch, ticket, result);
        }
    }

    /// Reopen the feed for the unchanged identity if it was lost. Returns
    /// whether a new subscription is now open.
    fn reopen_lost_subscription(self: &Arc<Self>, state: &mut State) -> bool {
        let user = match state.identity {
            Some(ref user) if state.subscription.is_none() => user.clone(),
            _ => return false,
        };
        info!(user = %user, "reopening change feed");
        state.feed_error = None;
        self.open_subscription(state, &user);
        state.subscription.is_some()
    }

    fn open_subscription(self: &Arc<Self>, state: &mut State, user: &UserId) {
        state.feed_generation += 1;
        let sub = match FeedSubscription::open(Arc::clone(&self.feed), user, &self.config.feed) {
            Ok(sub) => sub,
            Err(e) => {
                warn!(user = %user, error = %e, "change feed unavailable");
                state.feed_error = Some(e);
                return;
            }
        };

        if self.config.delivery == FeedDelivery::Background {
            let spawned = FeedWorker::spawn(
                Arc::downgrade(self),
                state.feed_generation,
                sub.channel(),
                sub.receiver().clone(),
            );
            match spawned {
                Ok(worker) => state.worker = Some(worker),
                Err(e) => {
                    warn!(error = %e, "failed to start feed worker");
                    state.feed_error = Some(SyncError::Subscription(e.to_string()));
                    // Dropping closes it.
                    return;
                }
            }
        }
        state.subscription = Some(sub);
    }

    fn apply_initial_list(&self, epoch: u64, ticket: u64, result: Result<Vec<Bookmark>>) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding stale initial list");
            return;
        }
        match result {
            Ok(rows) => {
                if ticket > state.applied_list_ticket {
                    state.applied_list_ticket = ticket;
                    state.collection.replace(rows);
                }
                state.phase = Phase::Ready;
                state.last_error = None;
                debug!(count = state.collection.len(), "initial list applied");
            }
            Err(e) => {
                warn!(error = %e, "failed to load bookmarks");
                state.collection.clear();
                state.phase = Phase::Error;
                state.last_error = Some(e);
            }
        }
    }

    /// Snapshot identity and epoch for an operation about to go remote.
    fn begin(&self) -> Result<(UserId, u64)> {
        let state = self.state.lock();
        Ok((state.current_user()?, state.epoch))
    }

    fn add_bookmark(&self, title: &str, url: &str) -> Result<Bookmark> {
        let (user, epoch) = self.begin()?;

        match self.client.create(&user, title, url) {
            Ok(row) => {
                debug!(id = %row.id, "bookmark created");
                if self.config.merge_responses {
                    let mut state = self.state.lock();
                    if state.epoch == epoch {
                        state.collection.insert(row.clone());
                    }
                }
                Ok(row)
            }
            Err(e) => {
                warn!(error = %e, "create failed");
                let mut state = self.state.lock();
                if state.epoch == epoch {
                    state.phase = Phase::Error;
                    state.last_error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    fn edit_bookmark(&self, id: &BookmarkId, updates: &BookmarkUpdate) -> Result<Bookmark> {
        let (user, epoch) = {
            let mut state = self.state.lock();
            let user = state.current_user()?;
            state.collection.patch(id, updates);
            (user, state.epoch)
        };

        match self.client.update(&user, id, updates) {
            Ok(row) => {
                if self.config.merge_responses {
                    let mut state = self.state.lock();
                    if state.epoch == epoch {
                        state.collection.overwrite(row.clone());
                    }
                }
                Ok(row)
            }
            Err(e) => {
                warn!(%id, error = %e, "edit failed, re-listing");
                Err(self.recover(&user, epoch, e))
            }
        }
    }

    fn remove_bookmark(&self, id: &BookmarkId) -> Result<()> {
        let (user, epoch) = {
            let mut state = self.state.lock();
            let user = state.current_user()?;
            state.collection.remove(id);
            (user, state.epoch)
        };

        match self.client.remove(&user, id) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(%id, error = %e, "remove failed, re-listing");
                Err(self.recover(&user, epoch, e))
            }
        }
    }

    /// Discard optimistic state after a failed mutation by re-listing.
    /// Returns the mutation's error for the caller.
    fn recover(&self, user: &UserId, epoch: u64, error: SyncError) -> SyncError {
        let ticket = self.state.lock().issue_list();
        let result = self.client.list(user);

        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(epoch, "discarding stale recovery list");
            return error;
        }
        match result {
            Ok(rows) => {
                if ticket > state.applied_list_ticket {
                    state.applied_list_ticket = ticket;
                    state.collection.replace(rows);
                }
            }
            Err(e) => warn!(error = %e, "recovery list failed"),
        }
        state.phase = Phase::Error;
        state.last_error = Some(error.clone());
        error
    }

    fn refresh(&self) -> Result<()> {
        let (user, epoch, ticket) = {
            let mut state = self.state.lock();
            let user = state.current_user()?;
            let ticket = state.issue_list();
            (user, state.epoch, ticket)
        };

        let result = self.client.list(&user);

        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(epoch, "discarding stale refresh");
            return Ok(());
        }
        match result {
            Ok(rows) => {
                // A newer list already landed; its outcome stands.
                if ticket <= state.applied_list_ticket {
                    debug!(ticket, applied = state.applied_list_ticket, "discarding older refresh");
                    return Ok(());
                }
                state.applied_list_ticket = ticket;
                state.collection.replace(rows);
                state.phase = Phase::Ready;
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "refresh failed");
                state.phase = Phase::Error;
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn drain_feed(&self) -> usize {
        let mut state = self.state.lock();
        let receiver = match state.subscription {
            Some(ref sub) => sub.receiver().clone(),
            None => return 0,
        };

        let mut applied = 0;
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    if !Self::merge(&mut state, event) {
                        break;
                    }
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                // Evicted without a Dropped event reaching us.
                Err(TryRecvError::Disconnected) => {
                    warn!("change feed disconnected");
                    Self::lose_subscription(
                        &mut state,
                        SyncError::Subscription("channel disconnected".into()),
                    );
                    break;
                }
            }
        }
        applied
    }

    /// Apply one event from the worker. Returns false once the worker
    /// should stop.
    pub(crate) fn apply_feed_event(&self, generation: u64, event: FeedEvent) -> bool {
        let mut state = self.state.lock();
        if state.feed_generation != generation {
            return false;
        }
        Self::merge(&mut state, event)
    }

    /// The worker's channel closed without a `Dropped` event.
    pub(crate) fn feed_disconnected(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.feed_generation != generation || state.subscription.is_none() {
            return;
        }
        warn!("change feed disconnected");
        Self::lose_subscription(&mut state, SyncError::Subscription("channel disconnected".into()));
    }

    /// Merge a feed event. Returns false when the subscription has ended.
    fn merge(state: &mut State, event: FeedEvent) -> bool {
        if let FeedEvent::Dropped { ref reason } = event {
            warn!(?reason, "change feed dropped");
            Self::lose_subscription(state, SyncError::Subscription(format!("{:?}", reason)));
            return false;
        }
        let changed = state.collection.apply(&event);
        debug!(?event, changed, "merged feed event");
        true
    }

    fn lose_subscription(state: &mut State, error: SyncError) {
        // Already closed on the producer side; closing again is a no-op there.
        if let Some(mut sub) = state.subscription.take() {
            sub.close();
        }
        // The worker is exiting on its own; detach it.
        state.worker.take();
        state.feed_generation += 1;
        state.feed_error = Some(error);
    }
}
