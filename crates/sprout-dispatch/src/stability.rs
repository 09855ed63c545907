//! Per-model failure tracking
//!
//! Circuit-breaker style: consecutive terminal failures against one model
//! open its circuit, a cooldown admits a single probe, and any success
//! closes it again. The dispatcher surfaces the open state as
//! `ModelUnstable` so the caller can offer an alternative model; it never
//! switches models on its own.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Stability states for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Normal operation - calls allowed
    Closed,
    /// Too many consecutive failures - calls rejected immediately
    Open,
    /// Cooldown elapsed - allow one probe call
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct ModelHealth {
    failures: u32,
    last_failure: Instant,
}

/// Tracks consecutive terminal failures per model id
pub struct ModelStability {
    models: Mutex<HashMap<String, ModelHealth>>,
    threshold: u32,
    cooldown: Duration,
}

impl ModelStability {
    /// * `threshold` - consecutive failures before a model is reported unstable
    /// * `cooldown` - how long calls are rejected before a probe is allowed
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            models: Mutex::new(HashMap::new()),
            threshold,
            cooldown,
        }
    }

    /// Current state for a model
    pub fn state(&self, model: &str) -> ModelState {
        let models = self.models.lock().unwrap();
        let health = match models.get(model) {
            Some(health) => *health,
            None => return ModelState::Closed,
        };

        if health.failures < self.threshold {
            return ModelState::Closed;
        }

        if health.last_failure.elapsed() >= self.cooldown {
            ModelState::HalfOpen
        } else {
            ModelState::Open
        }
    }

    /// Whether a call to this model may proceed
    pub fn can_execute(&self, model: &str) -> bool {
        self.state(model) != ModelState::Open
    }

    /// Record a successful call (closes the circuit)
    pub fn record_success(&self, model: &str) {
        let mut models = self.models.lock().unwrap();
        models.remove(model);
    }

    /// Record a terminal failure; returns the consecutive count
    pub fn record_failure(&self, model: &str) -> u32 {
        let mut models = self.models.lock().unwrap();
        let health = models.entry(model.to_string()).or_insert(ModelHealth {
            failures: 0,
            last_failure: Instant::now(),
        });
        health.failures += 1;
        health.last_failure = Instant::now();
        health.failures
    }

    /// Consecutive failure count for a model (for reporting)
    pub fn failures(&self, model: &str) -> u32 {
        let models = self.models.lock().unwrap();
        models.get(model).map(|h| h.failures).unwrap_or(0)
    }
}

impl Default for ModelStability {
    fn default() -> Self {
        // Conservative defaults: 3 failures, 60 second cooldown
        Self::new(3, Duration::from_secs(60))
    }
}
