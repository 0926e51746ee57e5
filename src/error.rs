use thiserror::Error;

// Basic error handling with thiserror
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Event stream closed by server")]
    ConnectionClosed,

    #[error("Event stream went silent for {0} seconds")]
    Inactive(u64),

    #[error("Wake lock unavailable: {0}")]
    WakeLockUnavailable(String),

    #[error("Task panicked or cancelled")]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// True for failures of the transport itself, which the connection
    /// manager recovers from by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::RequestFailed(_)
                | SyncError::IoError(_)
                | SyncError::InvalidResponse(_)
                | SyncError::ConnectionClosed
                | SyncError::Inactive(_)
        )
    }
}
