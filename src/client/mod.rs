//! Record store access.
//!
//! [`RemoteStore`] is the request/response boundary to the persistence
//! service. [`BookmarkClient`] wraps it, orders list results and collapses
//! every failure into one error kind.

mod remote;
mod store_client;

pub use remote::{RemoteError, RemoteStore};
pub use store_client::BookmarkClient;
