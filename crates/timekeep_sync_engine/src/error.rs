//! Error types for the sync engine.

use crate::api::ApiError;
use thiserror::Error;
use timekeep_core::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or server failure that the next scheduled run may recover
    /// from.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server rejected the request (validation, 4xx). The affected
    /// entity is marked unsyncable; the run continues.
    #[error("client rejection: {0}")]
    ClientRejection(String),

    /// The session's credentials are no longer valid. Halts the run;
    /// session management must re-authenticate.
    #[error("authorization lost")]
    Unauthorized,

    /// No default workspace can be determined: the user has none set and
    /// the accessible workspace count is not exactly one. Retrying cannot
    /// change the workspace count, so this is never retried.
    #[error("no default workspace determinable ({workspace_count} accessible workspaces)")]
    NoDefaultWorkspace {
        /// Number of accessible workspaces found.
        workspace_count: usize,
    },

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The orchestrator was frozen before the next state could start.
    #[error("sync frozen")]
    Frozen,
}

impl SyncError {
    /// Returns true if the next scheduled run should retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Store(_))
    }

    /// Returns true if the error halts the current run and transitions the
    /// orchestrator to `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized | SyncError::NoDefaultWorkspace { .. }
        )
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transient(message) => SyncError::Transient(message),
            ApiError::Unreachable(message) => SyncError::Transient(message),
            ApiError::ClientRejection(message) => SyncError::ClientRejection(message),
            ApiError::Unauthorized => SyncError::Unauthorized,
        }
    }
}
