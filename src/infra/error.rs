//! Error types for sink and synchronization infrastructure

use thiserror::Error;
use uuid::Uuid;

use crate::domain::SyncState;
use crate::infra::retry::is_retryable_db_error;
use crate::log::LogError;

/// Errors raised by a durable sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Sink temporarily unreachable
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// Row rejected by the sink; retrying will not help
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl SinkError {
    /// Whether the failure is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Database(e) => is_retryable_db_error(e),
            SinkError::Unavailable(_) => true,
            SinkError::InvalidData(_) => false,
        }
    }
}

/// Errors that can occur while synchronizing the log into a sink
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Log(#[from] LogError),

    /// A batch ran out of attempts; its ids are reported, never dropped
    #[error("batch {batch_id} exhausted its attempts ({} events failed)", failed_ids.len())]
    BatchExhausted {
        batch_id: Uuid,
        failed_ids: Vec<String>,
    },

    /// Batch not found in the engine's history
    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    /// Operation not allowed in the current engine state
    #[error("cannot {operation} while sync is {state}")]
    InvalidState {
        operation: &'static str,
        state: SyncState,
    },

    /// Request rejected before reaching the loop
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine's loop is gone
    #[error("sync engine stopped")]
    EngineStopped,

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Sink(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SinkError::Unavailable("down".into()).is_retryable());
        assert!(!SinkError::InvalidData("bad".into()).is_retryable());
        assert!(SinkError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!SinkError::Database(sqlx::Error::RowNotFound).is_retryable());

        let err: SyncError = SinkError::Unavailable("down".into()).into();
        assert!(err.is_retryable());
        assert!(!SyncError::EngineStopped.is_retryable());
    }

    #[test]
    fn test_exhausted_message_counts_ids() {
        let err = SyncError::BatchExhausted {
            batch_id: Uuid::nil(),
            failed_ids: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("2 events failed"));
    }
}
