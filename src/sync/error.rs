use thiserror::Error;

use crate::store::StoreError;

/// Outcome of a failed submission, or a storage failure around one.
///
/// Never shown to the user directly: a record's `sync_status` is the only
/// visible trace.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync submission timed out after {0}s")]
    Timeout(u64),

    #[error("Cannot reach sync server at {0}")]
    Connection(String),

    #[error("Sync server rejected record (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Sync server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl SyncError {
    /// Classify a non-success HTTP status. 4xx is permanent except
    /// 408 Request Timeout and 429 Too Many Requests.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            408 | 429 => Self::Server { status, body },
            400..=499 => Self::Rejected { status, body },
            _ => Self::Server { status, body },
        }
    }

    /// Whether the server may accept the same payload later. A rejected
    /// record is marked `failed` but stays on the backoff schedule.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}
