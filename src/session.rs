//! Session boundary: the current identity and its transitions.

use crate::reconcile::{Inner, Reconciler};
use crate::types::UserId;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

struct SessionState {
    current: Option<UserId>,
    watchers: Vec<Sender<Option<UserId>>>,
}

/// Holds the signed-in identity and notifies watchers when it changes.
///
/// Authentication happens elsewhere; this only records the outcome.
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                current: None,
                watchers: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> Option<UserId> {
        self.state.lock().current.clone()
    }

    pub fn sign_in(&self, user: UserId) {
        self.transition(Some(user));
    }

    pub fn sign_out(&self) {
        self.transition(None);
    }

    /// Receive every subsequent identity transition. Repeats of the current
    /// identity are not sent.
    pub fn watch(&self) -> Receiver<Option<UserId>> {
        let (tx, rx) = unbounded();
        self.state.lock().watchers.push(tx);
        rx
    }

    fn transition(&self, next: Option<UserId>) {
        let mut state = self.state.lock();
        if state.current == next {
            return;
        }
        info!(from = ?state.current, to = ?next, "session identity changed");
        state.current = next.clone();
        // Forget watchers whose receiver is gone.
        state.watchers.retain(|tx| tx.send(next.clone()).is_ok());
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a [`Reconciler`] following a [`Session`]. Stops when dropped.
pub struct SessionBinding {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SessionBinding {
    fn spawn(inner: Weak<Inner>, changes: Receiver<Option<UserId>>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let handle = thread::Builder::new()
            .name("session-binding".into())
            .spawn(move || loop {
                select! {
                    recv(changes) -> msg => {
                        let Ok(identity) = msg else { return };
                        let Some(inner) = inner.upgrade() else { return };
                        inner.set_identity(identity);
                    }
                    recv(stop_rx) -> _ => return,
                }
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop following. Idempotent.
    pub fn stop(&mut self) {
        // Disconnecting the stop channel wakes the thread.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            debug!("session binding stopped");
        }
    }
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Reconciler {
    /// Adopt `session`'s current identity now and follow its transitions
    /// on a background thread until the binding is dropped.
    pub fn follow(&self, session: &Session) -> std::io::Result<SessionBinding> {
        // Subscribe first so no transition slips between the two steps.
        let changes = session.watch();
        self.set_identity(session.current());
        SessionBinding::spawn(self.downgrade(), changes)
    }
}
