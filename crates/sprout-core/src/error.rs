//! Unified error types for Sprout

use thiserror::Error;
use uuid::Uuid;

/// Unified error type for all Sprout operations
#[derive(Error, Debug)]
pub enum SproutError {
    // Input validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Model service errors
    #[error("Model service rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Model call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Model service unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed model response: {0}")]
    InvalidResponse(String),

    #[error("Model {model} rejected the request as over its token limit; split the prompt or choose a different model")]
    TokenLimitExceeded { model: String },

    #[error("Model {model} is unstable ({failures} consecutive failures); try an alternative model")]
    ModelUnstable { model: String, failures: u32 },

    // Job errors
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    // Persistence errors
    #[error("Persistence store unavailable: {0}")]
    StoreUnavailable(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SproutError {
    /// Whether the dispatcher retries this error with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::Unavailable(_)
                | Self::InvalidResponse(_)
        )
    }

    /// Short failure-kind label recorded on failed call records
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidResponse(_) => "invalid_response",
            Self::TokenLimitExceeded { .. } => "token_limit_exceeded",
            Self::ModelUnstable { .. } => "model_unstable",
            Self::JobNotFound(_) => "job_not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias using SproutError
pub type Result<T> = std::result::Result<T, SproutError>;
