//! Retrying request dispatcher
//!
//! Single chokepoint for model calls: per-attempt deadline, exponential
//! backoff on retryable failures, structural validation of responses, and
//! per-model instability tracking. The dispatcher holds no token or cost
//! accounting; callers forward the returned counts to the ledger.

use crate::client::ModelClient;
use crate::stability::ModelStability;
use crate::types::{Completion, CompletionRequest, RawCompletion};
use sprout_core::{SproutError, TokenUsage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(16);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_UNSTABLE_THRESHOLD: u32 = 3;
const DEFAULT_UNSTABLE_COOLDOWN: Duration = Duration::from_secs(60);

/// Dispatcher tunables
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retries allowed after the initial attempt
    pub max_retries: u32,
    /// First backoff delay; doubles each retry
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Per-attempt deadline
    pub call_timeout: Duration,
    /// Consecutive terminal failures before a model reports unstable
    pub unstable_threshold: u32,
    /// How long an unstable model rejects calls before a probe
    pub unstable_cooldown: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            unstable_threshold: DEFAULT_UNSTABLE_THRESHOLD,
            unstable_cooldown: DEFAULT_UNSTABLE_COOLDOWN,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_stability(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.unstable_threshold = threshold;
        self.unstable_cooldown = cooldown;
        self
    }
}

/// A failed dispatch, with the accounting callers need for their records
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DispatchError {
    pub error: SproutError,
    /// Retries spent before giving up
    pub retries: u32,
    /// Wall time for the whole invocation, backoff included
    pub latency_ms: u64,
}

impl From<DispatchError> for SproutError {
    fn from(failure: DispatchError) -> Self {
        failure.error
    }
}

/// Retrying front door for a [`ModelClient`]
pub struct Dispatcher<C: ModelClient> {
    client: Arc<C>,
    config: DispatcherConfig,
    stability: ModelStability,
}

impl<C: ModelClient> Dispatcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self::with_config(client, DispatcherConfig::default())
    }

    pub fn with_config(client: Arc<C>, config: DispatcherConfig) -> Self {
        let stability = ModelStability::new(config.unstable_threshold, config.unstable_cooldown);
        Self {
            client,
            config,
            stability,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn stability(&self) -> &ModelStability {
        &self.stability
    }

    /// Issue one model call, retrying retryable failures with backoff.
    ///
    /// Known-unstable models are rejected up front with `ModelUnstable` so
    /// the caller can pick an alternative; no model substitution happens
    /// here.
    pub async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<Completion, DispatchError> {
        let started = std::time::Instant::now();

        if !self.stability.can_execute(model) {
            return Err(DispatchError {
                error: SproutError::ModelUnstable {
                    model: model.to_string(),
                    failures: self.stability.failures(model),
                },
                retries: 0,
                latency_ms: started.elapsed().as_millis() as u64,
            });
        }

        let request = CompletionRequest::new(model, prompt, max_tokens);
        let mut retries: u32 = 0;
        let mut delay = self.config.base_delay;

        loop {
            let attempt =
                tokio::time::timeout(self.config.call_timeout, self.client.complete(&request))
                    .await;

            let error = match attempt {
                Ok(Ok(raw)) => match validate(raw) {
                    Ok((text, usage)) => {
                        self.stability.record_success(model);
                        return Ok(Completion {
                            text,
                            usage,
                            retries,
                            latency_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    Err(error) => error,
                },
                Ok(Err(error)) => error,
                Err(_) => SproutError::Timeout {
                    seconds: self.config.call_timeout.as_secs(),
                },
            };

            if !error.is_retryable() || retries >= self.config.max_retries {
                return Err(self.give_up(model, error, retries, started));
            }

            // Server-provided hint overrides the computed delay for this step
            let wait = match &error {
                SproutError::RateLimited {
                    retry_after_secs: Some(secs),
                } => Duration::from_secs(*secs),
                _ => delay,
            };

            retries += 1;
            tracing::warn!(
                "Model call to {} failed ({}), retrying in {}s (attempt {}/{})",
                model,
                error,
                wait.as_secs(),
                retries,
                self.config.max_retries
            );
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(self.config.max_delay);
        }
    }

    /// Record a terminal failure and decide which error the caller sees.
    ///
    /// Every terminal failure counts toward instability, whatever its kind;
    /// crossing the threshold replaces the error with `ModelUnstable`.
    fn give_up(
        &self,
        model: &str,
        error: SproutError,
        retries: u32,
        started: std::time::Instant,
    ) -> DispatchError {
        let failures = self.stability.record_failure(model);
        let error = if failures >= self.config.unstable_threshold {
            tracing::warn!(
                "Model {} reported unstable after {} consecutive failures",
                model,
                failures
            );
            SproutError::ModelUnstable {
                model: model.to_string(),
                failures,
            }
        } else {
            error
        };
        DispatchError {
            error,
            retries,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Structural validation of a raw completion
fn validate(raw: RawCompletion) -> sprout_core::Result<(String, TokenUsage)> {
    if raw.text.trim().is_empty() {
        return Err(SproutError::InvalidResponse(
            "empty completion text".to_string(),
        ));
    }
    if raw.input_tokens < 0 || raw.output_tokens < 0 {
        return Err(SproutError::InvalidResponse(format!(
            "negative token counts: input={}, output={}",
            raw.input_tokens, raw.output_tokens
        )));
    }
    Ok((
        raw.text,
        TokenUsage::new(raw.input_tokens as u64, raw.output_tokens as u64),
    ))
}
