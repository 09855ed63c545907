//! Request/response types for the model inference service

use serde::{Deserialize, Serialize};
use sprout_core::TokenUsage;

/// One request to the model inference service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

/// Wire-level response, not yet validated
///
/// Token counts stay signed here; the dispatcher rejects negatives before
/// anything downstream sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCompletion {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Validated completion as returned by the dispatcher
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// Retries spent before the attempt that succeeded
    pub retries: u32,
    /// Wall time for the whole invocation, backoff included
    pub latency_ms: u64,
}
