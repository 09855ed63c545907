//! Session-scoped cost accounting

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sprout_core::{CallOutcome, CallRecord, JobId, Pricing, TaskType, TokenUsage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Running aggregate for one session, derived by folding call records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub calls: u64,
    /// Cost split by task type
    pub by_task: HashMap<TaskType, Decimal>,
}

impl SessionTotals {
    fn absorb(&mut self, record: &CallRecord) {
        self.input_tokens += record.usage.input_tokens;
        self.output_tokens += record.usage.output_tokens;
        self.cost += record.cost;
        self.calls += 1;
        *self.by_task.entry(record.task).or_insert(Decimal::ZERO) += record.cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One dispatcher invocation to record
#[derive(Debug, Clone)]
pub struct CallParams<'a> {
    pub session_id: &'a str,
    pub job_id: JobId,
    pub model: &'a str,
    pub task: TaskType,
    pub usage: TokenUsage,
    pub pricing: Pricing,
    pub outcome: CallOutcome,
    pub retries: u32,
    pub latency_ms: u64,
}

/// Cost ledger: converts token counts into money and accumulates per session
///
/// Totals are updated in the same write section that stores the record's
/// contribution, so a read issued after `record_call` returns always sees
/// that call included. Many coding-phase calls commit concurrently; the
/// single write lock makes each increment atomic.
pub struct CostLedger {
    sessions: Arc<RwLock<HashMap<String, SessionTotals>>>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
}

impl CostLedger {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Record one dispatcher invocation and return the immutable record
    pub async fn record_call(&self, params: CallParams<'_>) -> CallRecord {
        let cost = params.pricing.cost_of(params.usage);
        let record = CallRecord {
            id: Uuid::new_v4(),
            job_id: params.job_id,
            session_id: params.session_id.to_string(),
            model: params.model.to_string(),
            task: params.task,
            usage: params.usage,
            cost,
            outcome: params.outcome,
            retries: params.retries,
            latency_ms: params.latency_ms,
            recorded_at: Utc::now(),
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if !record.outcome.is_success() {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(record.session_id.clone())
            .or_default()
            .absorb(&record);
        debug!(
            "Recorded {} call for session {} (cost {})",
            record.task, record.session_id, record.cost
        );

        record
    }

    /// Live totals for a session
    pub async fn session_total(&self, session_id: &str) -> SessionTotals {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Cost per task type for a session
    pub async fn breakdown(&self, session_id: &str) -> HashMap<TaskType, Decimal> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|totals| totals.by_task.clone())
            .unwrap_or_default()
    }

    /// Pure comparison of the live session total against a threshold
    pub async fn check_threshold(&self, session_id: &str, threshold: Decimal) -> bool {
        self.session_total(session_id).await.cost >= threshold
    }

    /// Global counters across all sessions
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Global ledger counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_calls: u64,
    pub total_failures: u64,
}
