//! Per-model pricing table
//!
//! Prices arrive from the provider's pricing endpoint and are refreshed in
//! the background. Lookups never fail: an unknown model gets the fallback
//! rate so cost accounting degrades instead of blocking generation.

use crate::client::ModelClient;
use rust_decimal::Decimal;
use sprout_core::Pricing;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Rate applied when a model is missing from the table
pub fn default_pricing() -> Pricing {
    // 0.003 / 1k input, 0.015 / 1k output
    Pricing::new(Decimal::new(3, 3), Decimal::new(15, 3))
}

/// Shared, refreshable model → price table
pub struct PricingBook {
    prices: RwLock<HashMap<String, Pricing>>,
    fallback: Pricing,
}

impl Default for PricingBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingBook {
    pub fn new() -> Self {
        Self::from_prices(HashMap::new())
    }

    pub fn from_prices(prices: HashMap<String, Pricing>) -> Self {
        Self {
            prices: RwLock::new(prices),
            fallback: default_pricing(),
        }
    }

    pub fn with_fallback(mut self, fallback: Pricing) -> Self {
        self.fallback = fallback;
        self
    }

    /// Rate for `model`, or the fallback when unlisted
    pub async fn lookup(&self, model: &str) -> Pricing {
        let prices = self.prices.read().await;
        prices.get(model).copied().unwrap_or(self.fallback)
    }

    pub async fn len(&self) -> usize {
        self.prices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prices.read().await.is_empty()
    }

    /// Replace the table from the provider's pricing endpoint.
    ///
    /// A fetch failure keeps the previous table; returns whether the table
    /// was updated.
    pub async fn refresh<C: ModelClient>(&self, client: &C) -> bool {
        match client.pricing().await {
            Ok(prices) => {
                let count = prices.len();
                *self.prices.write().await = prices;
                tracing::debug!("Refreshed pricing for {} models", count);
                true
            }
            Err(error) => {
                tracing::warn!("Pricing refresh failed, keeping previous table: {}", error);
                false
            }
        }
    }
}

/// Background task that refreshes `book` on a fixed period, starting with
/// an immediate fetch. Abort the handle to stop it.
pub fn spawn_refresh<C: ModelClient + 'static>(
    book: Arc<PricingBook>,
    client: Arc<C>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            book.refresh(client.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModelClient;

    #[tokio::test]
    async fn test_lookup_falls_back_for_unknown_model() {
        let book = PricingBook::new();
        assert_eq!(book.lookup("mystery").await, default_pricing());

        let custom = Pricing::new(Decimal::new(1, 3), Decimal::new(2, 3));
        let book = PricingBook::new().with_fallback(custom);
        assert_eq!(book.lookup("mystery").await, custom);
    }

    #[tokio::test]
    async fn test_refresh_replaces_table() {
        let listed = Pricing::new(Decimal::new(5, 3), Decimal::new(25, 3));
        let client = MockModelClient::new().with_pricing("m1", listed);
        let book = PricingBook::new();

        assert!(book.refresh(&client).await);
        assert_eq!(book.lookup("m1").await, listed);
        assert_eq!(book.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_table() {
        let listed = Pricing::new(Decimal::new(5, 3), Decimal::new(25, 3));
        let mut prices = HashMap::new();
        prices.insert("m1".to_string(), listed);
        let book = PricingBook::from_prices(prices);

        let client = MockModelClient::new().with_pricing_error();
        assert!(!book.refresh(&client).await);
        assert_eq!(book.lookup("m1").await, listed);
    }
}
