use hearth_gateway::GatewayError;
use hearth_store::StoreError;
use hearth_types::Cid;

/// Errors from WAL operations.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A pending commit references a block that is gone locally even
    /// though the car log still lists it.
    #[error("missing local car {cid}")]
    MissingLocalBlock { cid: Cid },

    /// Some uploads of a drain pass failed after exhausting their retries.
    #[error("{failed} of {total} uploads failed")]
    UploadFailed { failed: usize, total: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// An upload task panicked or was cancelled.
    #[error("upload task failed: {0}")]
    Task(String),
}

impl WalError {
    /// Whether retrying the failed operation can succeed.
    ///
    /// A missing local block cannot reappear by retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingLocalBlock { .. } | Self::Serialization(_))
    }
}

/// Result alias for WAL operations.
pub type WalResult<T> = Result<T, WalError>;
