//! Shared execution context for phase executors

use crate::events::{ProgressBus, ProgressEvent, ProgressKind};
use crate::pipeline::PipelineConfig;
use rust_decimal::Decimal;
use sprout_core::{CallOutcome, CallRecord, Job, Result, TaskType, TokenUsage};
use sprout_dispatch::{Completion, Dispatcher, ModelClient, PricingBook};
use sprout_ledger::{CallParams, CostLedger};
use sprout_store::JobStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Session cost threshold with one-shot edge detection
pub(crate) struct ThresholdWatch {
    threshold: Option<Decimal>,
    fired: AtomicBool,
}

impl ThresholdWatch {
    pub(crate) fn new(threshold: Option<Decimal>) -> Self {
        Self {
            threshold,
            fired: AtomicBool::new(false),
        }
    }

    /// True exactly once, on the first total at or above the threshold
    pub(crate) fn crossed(&self, total: Decimal) -> bool {
        match self.threshold {
            Some(threshold) if total >= threshold => !self.fired.swap(true, Ordering::SeqCst),
            _ => false,
        }
    }
}

/// Everything a phase executor needs to run model calls for one job
pub(crate) struct PhaseContext<C: ModelClient> {
    pub dispatcher: Arc<Dispatcher<C>>,
    pub ledger: Arc<CostLedger>,
    pub pricing: Arc<PricingBook>,
    pub store: Arc<dyn JobStore>,
    pub bus: Arc<ProgressBus>,
    pub config: PipelineConfig,
    /// Cross-job cap on in-flight model calls
    pub global_calls: Arc<Semaphore>,
    pub threshold: ThresholdWatch,
}

/// One dispatched call with its immutable record
pub(crate) struct RecordedCall {
    pub outcome: Result<Completion>,
    pub record: CallRecord,
}

/// Dispatch one model call and account for it.
///
/// The call is recorded in the ledger and appended to the store whatever
/// its outcome; the one-shot threshold event fires here when the session
/// total crosses the configured line. The model is the job's selection
/// for `task`.
pub(crate) async fn call_and_record<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    task: TaskType,
    prompt: &str,
    max_tokens: u32,
) -> RecordedCall {
    let model = job.models.for_task(task);
    let pricing = ctx.pricing.lookup(model).await;

    let (usage, outcome, retries, latency_ms, result) =
        match ctx.dispatcher.invoke(model, prompt, max_tokens).await {
            Ok(completion) => (
                completion.usage,
                CallOutcome::Success,
                completion.retries,
                completion.latency_ms,
                Ok(completion),
            ),
            Err(failure) => (
                TokenUsage::default(),
                CallOutcome::Failed {
                    kind: failure.error.kind_label().to_string(),
                },
                failure.retries,
                failure.latency_ms,
                Err(failure.error),
            ),
        };

    let record = ctx
        .ledger
        .record_call(CallParams {
            session_id: &job.session_id,
            job_id: job.id,
            model,
            task,
            usage,
            pricing,
            outcome,
            retries,
            latency_ms,
        })
        .await;

    if let Err(error) = ctx.store.append_call_records(job.id, &[record.clone()]).await {
        // Ledger accounting survives; only the stored copy is lost
        tracing::warn!("Could not persist call record for job {}: {}", job.id, error);
    }

    let session = ctx.ledger.session_total(&job.session_id).await;
    if ctx.threshold.crossed(session.cost) {
        tracing::info!(
            "Session {} crossed cost threshold at {}",
            job.session_id,
            session.cost
        );
        ctx.bus
            .emit(ProgressEvent::new(
                job.id,
                job.status,
                ProgressKind::ThresholdCrossed {
                    session_cost: session.cost,
                },
            ))
            .await;
    }

    RecordedCall {
        outcome: result,
        record,
    }
}
