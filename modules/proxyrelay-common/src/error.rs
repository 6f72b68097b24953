use thiserror::Error;

/// Failures surfaced by a transport capability.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Channel not found or not public: {0}")]
    NotFound(String),

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Credential failures abort the whole run; everything else is scoped to
    /// one source or one post.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Transport authorization failed: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
