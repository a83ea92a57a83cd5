//! Scripted test double around the in-process backend.
#![allow(dead_code)]

use bookmark_sync::{
    Bookmark, BookmarkId, BookmarkInsert, BookmarkUpdate, ChangeFeed, FeedConfig, MemoryBackend,
    Phase, Reconciler, RemoteError, RemoteStore, SubscriptionHandle, SubscriptionId, SyncError,
    UserId,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Test side of a gate: observe the call arriving, then let it continue.
pub struct Gate {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("gated call never arrived");
    }

    pub fn release(&self) {
        self.release.send(()).expect("gated call went away");
    }
}

/// Remote side of a gate.
struct Latch {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Latch {
    fn hold(self) {
        let _ = self.entered.send(());
        let _ = self.release.recv();
    }
}

fn gate_pair() -> (Gate, Latch) {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    (
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
        Latch {
            entered: entered_tx,
            release: release_rx,
        },
    )
}

/// Wraps a [`MemoryBackend`] with injected failures, gates and a log of
/// feed calls.
pub struct ScriptedRemote {
    pub backend: Arc<MemoryBackend>,
    fail_selects: AtomicUsize,
    fail_inserts: AtomicUsize,
    fail_updates: AtomicUsize,
    fail_deletes: AtomicUsize,
    refuse_subscriptions: AtomicBool,
    select_gates: Mutex<VecDeque<Latch>>,
    insert_gates: Mutex<VecDeque<Latch>>,
    update_gates: Mutex<VecDeque<Latch>>,
    delete_gates: Mutex<VecDeque<Latch>>,
    feed_log: Mutex<Vec<String>>,
    select_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            backend: Arc::new(MemoryBackend::new()),
            fail_selects: AtomicUsize::new(0),
            fail_inserts: AtomicUsize::new(0),
            fail_updates: AtomicUsize::new(0),
            fail_deletes: AtomicUsize::new(0),
            refuse_subscriptions: AtomicBool::new(false),
            select_gates: Mutex::new(VecDeque::new()),
            insert_gates: Mutex::new(VecDeque::new()),
            update_gates: Mutex::new(VecDeque::new()),
            delete_gates: Mutex::new(VecDeque::new()),
            feed_log: Mutex::new(Vec::new()),
            select_calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_select(&self) {
        self.fail_selects.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_insert(&self) {
        self.fail_inserts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_update(&self) {
        self.fail_updates.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_delete(&self) {
        self.fail_deletes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    pub fn gate_next_select(&self) -> Gate {
        let (gate, latch) = gate_pair();
        self.select_gates.lock().push_back(latch);
        gate
    }

    /// Holds the response after the row is written and broadcast.
    pub fn gate_next_insert(&self) -> Gate {
        let (gate, latch) = gate_pair();
        self.insert_gates.lock().push_back(latch);
        gate
    }

    pub fn gate_next_update(&self) -> Gate {
        let (gate, latch) = gate_pair();
        self.update_gates.lock().push_back(latch);
        gate
    }

    pub fn gate_next_delete(&self) -> Gate {
        let (gate, latch) = gate_pair();
        self.delete_gates.lock().push_back(latch);
        gate
    }

    pub fn feed_log(&self) -> Vec<String> {
        self.feed_log.lock().clone()
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    /// Insert directly, as another client of the same account would.
    pub fn seed(&self, user: &str, title: &str, url: &str) -> Bookmark {
        self.backend
            .insert(&UserId::new(user), &BookmarkInsert::new(title, url))
            .expect("seed insert")
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn hold(gates: &Mutex<VecDeque<Latch>>) {
        let latch = gates.lock().pop_front();
        if let Some(latch) = latch {
            latch.hold();
        }
    }
}

impl RemoteStore for ScriptedRemote {
    fn select(&self, caller: &UserId) -> Result<Vec<Bookmark>, RemoteError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.backend.select(caller);
        Self::hold(&self.select_gates);
        if Self::take_failure(&self.fail_selects) {
            return Err(RemoteError::Transport("select failed".into()));
        }
        rows
    }

    fn insert(&self, caller: &UserId, row: &BookmarkInsert) -> Result<Bookmark, RemoteError> {
        if Self::take_failure(&self.fail_inserts) {
            return Err(RemoteError::AccessDenied("insert refused".into()));
        }
        let result = self.backend.insert(caller, row);
        Self::hold(&self.insert_gates);
        result
    }

    fn update(
        &self,
        caller: &UserId,
        id: &BookmarkId,
        patch: &BookmarkUpdate,
    ) -> Result<Bookmark, RemoteError> {
        Self::hold(&self.update_gates);
        if Self::take_failure(&self.fail_updates) {
            return Err(RemoteError::Transport("update failed".into()));
        }
        self.backend.update(caller, id, patch)
    }

    fn delete(&self, caller: &UserId, id: &BookmarkId) -> Result<(), RemoteError> {
        Self::hold(&self.delete_gates);
        if Self::take_failure(&self.fail_deletes) {
            return Err(RemoteError::Transport("delete failed".into()));
        }
        self.backend.delete(caller, id)
    }
}

impl ChangeFeed for ScriptedRemote {
    fn subscribe(&self, user: &UserId, config: &FeedConfig) -> bookmark_sync::Result<SubscriptionHandle> {
        if self.refuse_subscriptions.load(Ordering::SeqCst) {
            self.feed_log.lock().push(format!("refuse {}", user));
            return Err(SyncError::Subscription("refused".into()));
        }
        let handle = self.backend.subscribe(user, config)?;
        self.feed_log
            .lock()
            .push(format!("subscribe {} #{}", user, handle.id.0));
        Ok(handle)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.feed_log.lock().push(format!("unsubscribe #{}", id.0));
        self.backend.unsubscribe(id);
    }
}

/// Route library logs to the test harness's captured output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn user(name: &str) -> UserId {
    UserId::new(name)
}

pub fn titles(reconciler: &Reconciler) -> Vec<String> {
    reconciler.snapshot().into_iter().map(|b| b.title).collect()
}

/// Poll until `cond` holds or five seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn wait_for_phase(reconciler: &Reconciler, phase: Phase) -> bool {
    wait_until(|| reconciler.phase() == phase)
}
