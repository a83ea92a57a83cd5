//! Change feed for live row updates.
//!
//! The producer side ([`FeedBroker`], or any [`ChangeFeed`]) pushes typed
//! [`FeedEvent`]s over a bounded channel per subscription:
//! - Inserts and updates, scoped to the subscriber's identity
//! - Deletes, unscoped unless the feed can see the old row's owner
//! - A final `Dropped` when the subscription ends
//!
//! # Example
//!
//! ```ignore
//! let broker = Arc::new(FeedBroker::new());
//! let sub = FeedSubscription::open(broker, &UserId::new("user-1"), &FeedConfig::default())?;
//!
//! loop {
//!     match sub.receiver().recv() {
//!         Ok(FeedEvent::Inserted { record }) => println!("new: {:?}", record),
//!         Ok(FeedEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod broker;
mod payload;
mod subscriber;
mod types;

pub use broker::{ChangeFeed, FeedBroker};
pub use subscriber::FeedSubscription;
pub use types::{
    DropReason, FeedConfig, FeedEvent, FeedFilter, SubscriptionHandle, SubscriptionId,
};
