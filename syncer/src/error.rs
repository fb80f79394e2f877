use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// An error shared between every waiter of one in-flight job.
pub type SharedError = Arc<SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("cohort {id} exceeds the maximum size ({size} > {max_size})")]
    CohortTooLarge { id: String, size: u64, max_size: u64 },

    #[error("in-flight job for {0} was interrupted before completing")]
    JobInterrupted(String),

    #[error("{0}")]
    Shared(SharedError),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl SyncError {
    /// Transient failures worth retrying: connection-level errors, 429 and
    /// 5xx responses. Other client errors propagate immediately.
    pub fn is_retriable(&self) -> bool {
        match self {
            SyncError::Request(err) => err.is_connect() || err.is_timeout(),
            SyncError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
