//! HTTP client for the model inference service
//!
//! Each call is stateless: prompt in, text plus token counts out. Retry,
//! deadline, and validation live in the dispatcher, not here. This module
//! only maps transport outcomes onto the error taxonomy.

use crate::types::{CompletionRequest, RawCompletion};
use async_trait::async_trait;
use serde::Deserialize;
use sprout_core::{Pricing, Result, SproutError};
use std::collections::HashMap;
use std::env;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Trait for calling the model inference service (allows mocking in tests)
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue one completion call
    async fn complete(&self, request: &CompletionRequest) -> Result<RawCompletion>;

    /// Fetch current per-model pricing
    async fn pricing(&self) -> Result<HashMap<String, Pricing>>;
}

/// Pricing payload returned by the service
#[derive(Debug, Deserialize)]
struct PricingResponse {
    models: HashMap<String, Pricing>,
}

/// Real HTTP model client
#[derive(Clone)]
pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Build a client from SPROUT_API_URL / SPROUT_API_KEY
    pub fn from_env() -> Self {
        let base_url =
            env::var("SPROUT_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut client = Self::new(base_url);
        if let Ok(key) = env::var("SPROUT_API_KEY") {
            client = client.with_api_key(key);
        }
        client
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<RawCompletion> {
        debug!("Sending completion request for model {}", request.model);

        let response = self
            .authed(
                self.http
                    .post(format!("{}/v1/completions", self.base_url))
                    .json(request),
            )
            .send()
            .await
            .map_err(|e| SproutError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(SproutError::RateLimited { retry_after_secs });
        }

        if status.as_u16() == 413 {
            return Err(SproutError::TokenLimitExceeded {
                model: request.model.clone(),
            });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            // Some deployments report token-limit rejections as a plain 400
            if status.as_u16() == 400 && body.contains("token") && body.contains("limit") {
                return Err(SproutError::TokenLimitExceeded {
                    model: request.model.clone(),
                });
            }
            return Err(SproutError::Unavailable(format!("{}: {}", status, body)));
        }

        response
            .json::<RawCompletion>()
            .await
            .map_err(|e| SproutError::InvalidResponse(format!("undecodable body: {}", e)))
    }

    async fn pricing(&self) -> Result<HashMap<String, Pricing>> {
        let response = self
            .authed(self.http.get(format!("{}/v1/pricing", self.base_url)))
            .send()
            .await
            .map_err(|e| SproutError::Unavailable(format!("pricing fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SproutError::Unavailable(format!(
                "pricing fetch: {}",
                response.status()
            )));
        }

        let payload: PricingResponse = response
            .json()
            .await
            .map_err(|e| SproutError::InvalidResponse(format!("pricing body: {}", e)))?;
        Ok(payload.models)
    }
}
