//! # Bookmark Sync
//!
//! Keeps a local, in-memory bookmark collection consistent with a remote
//! record store while three things happen at once: the initial load,
//! user edits that must show immediately, and change notifications pushed
//! by the store (including edits from other clients of the same account).
//!
//! ## Core Concepts
//!
//! - **Client**: request/response access to the store, one error kind
//! - **Feed**: per-identity change subscriptions over bounded channels
//! - **Reconciler**: the state machine merging local edits and feed events
//! - **Session**: the signed-in identity the reconciler follows
//!
//! ## Example
//!
//! ```ignore
//! use bookmark_sync::{MemoryBackend, Reconciler, ReconcilerConfig, Session, UserId};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let reconciler = Reconciler::new(backend.clone(), backend, ReconcilerConfig::default());
//!
//! let session = Session::new();
//! let _binding = reconciler.follow(&session)?;
//! session.sign_in(UserId::new("user-1"));
//!
//! reconciler.add_bookmark("Rust", "https://www.rust-lang.org")?;
//! for bookmark in reconciler.snapshot() {
//!     println!("{} -> {}", bookmark.title, bookmark.url);
//! }
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod feed;
pub mod reconcile;
pub mod session;
pub mod types;

// Re-exports
pub use backend::MemoryBackend;
pub use client::{BookmarkClient, RemoteError, RemoteStore};
pub use error::{Result, SyncError};
pub use feed::{
    ChangeFeed, DropReason, FeedBroker, FeedConfig, FeedEvent, FeedFilter, FeedSubscription,
    SubscriptionHandle, SubscriptionId,
};
pub use reconcile::{Collection, FeedDelivery, Phase, Reconciler, ReconcilerConfig};
pub use session::{Session, SessionBinding};
pub use types::*;
