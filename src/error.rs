//! Error types for bookmark synchronization.

use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Any failure reported by the record store: transport, access policy,
    /// or a missing row on update.
    #[error("Store error: {0}")]
    Store(String),

    /// The change feed could not be opened or was dropped.
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("No signed-in identity")]
    NoIdentity,

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
