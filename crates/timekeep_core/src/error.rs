//! Error types for the TimeKeep local store.

use crate::types::EntityId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// An update carried an `at` timestamp no newer than the stored row.
    #[error("stale write for {id}: incoming at {incoming}, stored at {stored}")]
    StaleWrite {
        /// Entity that was written.
        id: EntityId,
        /// Timestamp of the incoming row.
        incoming: chrono::DateTime<chrono::Utc>,
        /// Timestamp of the stored row.
        stored: chrono::DateTime<chrono::Utc>,
    },

    /// The singleton record has not been stored yet.
    #[error("singleton record missing")]
    SingletonMissing,
}
