//! Error types for the space-combat cache layer.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lock, store, and cache-level failures.
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Lock hierarchy errors
    // ==========================================================================
    #[error("lock order violation: attempted to acquire {attempted} while holding {held}")]
    LockOrderViolation { attempted: String, held: String },

    #[error("lock already held: {0}")]
    LockAlreadyHeld(String),

    #[error("lock not held: scope attempted to use {0} without acquiring it")]
    LockNotHeld(String),

    // ==========================================================================
    // Lifecycle errors
    // ==========================================================================
    #[error("cache not initialized: {0}")]
    NotInitialized(String),

    // ==========================================================================
    // Store-boundary errors
    // ==========================================================================
    #[error("unique constraint violated: {0}")]
    UniqueConstraint(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("pending message insert failed for user {user_id}: {reason}")]
    PendingInsertFailed { user_id: i64, reason: String },

    #[error("malformed persisted json in {field}: {reason}")]
    MalformedPersistedJson { field: String, reason: String },

    // ==========================================================================
    // Generic I/O / serialization
    // ==========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable machine-readable error code, for logging/metrics.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::LockOrderViolation { .. } => "LOCK_ORDER_VIOLATION",
            Self::LockAlreadyHeld(_) => "LOCK_ALREADY_HELD",
            Self::LockNotHeld(_) => "LOCK_NOT_HELD",
            Self::NotInitialized(_) => "NOT_INITIALIZED",
            Self::UniqueConstraint(_) => "UNIQUE_CONSTRAINT",
            Self::StoreFailure(_) => "STORE_FAILURE",
            Self::PendingInsertFailed { .. } => "PENDING_INSERT_FAILED",
            Self::MalformedPersistedJson { .. } => "MALFORMED_PERSISTED_JSON",
            Self::Io(_) => "OS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "UNHANDLED_EXCEPTION",
        }
    }

    /// Returns whether the caller's unit of work may be retried as-is.
    ///
    /// Lock-ordering bugs and malformed-JSON fallbacks are not retryable —
    /// the first is a programming error, the second already recovered by
    /// falling back to a typed default. Store failures and pending-insert
    /// failures are transient and may succeed on a later attempt.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized(_)
                | Self::UniqueConstraint(_)
                | Self::StoreFailure(_)
                | Self::PendingInsertFailed { .. }
                | Self::Io(_)
        )
    }
}
