//! Error types for the sync engine.

use crate::remote::RemoteError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The offline layer failed.
    #[error("offline layer error: {0}")]
    Offline(#[from] kata_offline::OfflineError),

    /// The persistent store failed.
    #[error("storage error: {0}")]
    Storage(#[from] kata_storage::StorageError),

    /// The network or data-usage policy forbids syncing right now.
    #[error("sync not permitted: {0}")]
    NotPermitted(&'static str),

    /// The engine is paused by the user.
    #[error("sync engine is paused")]
    Paused,

    /// No signed-in user; the queue cannot be scoped.
    #[error("no authenticated user")]
    NotAuthenticated,
}

impl SyncError {
    /// True when a later run may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::NotPermitted(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::Remote(RemoteError::Timeout).is_transient());
        assert!(SyncError::NotPermitted("offline").is_transient());
        assert!(!SyncError::NotAuthenticated.is_transient());
        assert!(!SyncError::Remote(RemoteError::PermissionDenied("c-1".into())).is_transient());
    }
}
