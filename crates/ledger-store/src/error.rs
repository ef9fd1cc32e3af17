use thiserror::Error;

use crate::{RecordKey, Version};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// A record touched by a change set is no longer at the version the
    /// change set was built against. Nothing from the change set was applied.
    #[error("Concurrency conflict on {record}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        record: RecordKey,
        expected: Version,
        actual: Version,
    },

    /// The change set was rejected before reaching storage.
    #[error("Invalid change set: {0}")]
    InvalidChangeSet(String),

    /// A stored row could not be mapped back to a record.
    #[error("Corrupt record {record}: {reason}")]
    Corrupt { record: String, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerStoreError {
    /// Returns true if retrying the whole read-modify-write cycle may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, LedgerStoreError>;
