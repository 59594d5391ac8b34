//! Error types for the offline layer.

use thiserror::Error;

/// Result type for offline-layer operations.
pub type OfflineResult<T> = Result<T, OfflineError>;

/// Errors that can occur in the offline layer.
#[derive(Debug, Error)]
pub enum OfflineError {
    /// The underlying store failed.
    #[error("storage error: {0}")]
    Storage(#[from] kata_storage::StorageError),

    /// A record could not be serialized for persistence.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No conflict with the given id exists.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// The conflict already carries a resolution.
    #[error("conflict already resolved: {0}")]
    ConflictAlreadyResolved(String),

    /// The conflict has no resolution to apply yet.
    #[error("conflict not yet resolved: {0}")]
    ConflictUnresolved(String),

    /// The authoritative reaction lookup failed.
    #[error("reaction lookup failed: {0}")]
    Reaction(String),
}
