//! Shared fixtures for store tests

use chrono::Utc;
use rust_decimal::Decimal;
use sprout_core::{CallOutcome, CallRecord, GenerationRequest, Job, TaskType, TokenUsage};
use uuid::Uuid;

pub fn sample_job() -> Job {
    Job::new(&GenerationRequest::new("build a todo app", "m-plan", "m-code"))
}

pub fn record_for(job: &Job, input: u64, output: u64, cost: Decimal) -> CallRecord {
    CallRecord {
        id: Uuid::new_v4(),
        job_id: job.id,
        session_id: job.session_id.clone(),
        model: job.models.coding.clone(),
        task: TaskType::Coding,
        usage: TokenUsage::new(input, output),
        cost,
        outcome: CallOutcome::Success,
        retries: 0,
        latency_ms: 12,
        recorded_at: Utc::now(),
    }
}
