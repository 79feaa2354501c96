use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The tier's API is absent or could not be opened in this runtime.
    #[error("storage tier unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("quota exceeded writing {key}: {bytes} bytes (limit {limit})")]
    QuotaExceeded { key: String, bytes: usize, limit: usize },

    #[error("transaction error: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] scriptdesk_core::CoreError),
}

impl StorageError {
    /// Errors that should make the gateway degrade to the next tier.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnavailable(_) | Self::Transaction(_) | Self::Io(_)
        )
    }
}
