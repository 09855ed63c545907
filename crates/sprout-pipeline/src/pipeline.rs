//! Pipeline driver
//!
//! One task per job owns the Job end to end: it walks the state
//! machine, executes each phase action and feeds the resulting event
//! back in. Status and totals are saved to the store on every
//! transition; progress events go out on the bus. Cancellation is
//! honored at phase boundaries, letting in-flight calls finish.

use crate::coding;
use crate::context::PhaseContext;
use crate::docs;
use crate::events::{ProgressEvent, ProgressKind};
use crate::locks::JobLocks;
use crate::planning;
use crate::state_machine::{transition, Action, Event, State};
use rust_decimal::Decimal;
use sprout_core::{Artifact, Job, JobStatus, ProjectPlan};
use sprout_dispatch::ModelClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline tunables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent file generations within one job
    pub max_concurrent_files: usize,
    /// Concurrent model calls across all jobs
    pub max_global_calls: usize,
    /// Token budget for the planning call
    pub max_plan_tokens: u32,
    /// Token budget per file generation call
    pub max_code_tokens: u32,
    /// Token budget per documentation call
    pub max_doc_tokens: u32,
    /// Session cost that fires the one-shot threshold event
    pub cost_threshold: Option<Decimal>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: 4,
            max_global_calls: 8,
            max_plan_tokens: 2048,
            max_code_tokens: 4096,
            max_doc_tokens: 2048,
            cost_threshold: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_max_concurrent_files(mut self, limit: usize) -> Self {
        self.max_concurrent_files = limit;
        self
    }

    pub fn with_max_global_calls(mut self, limit: usize) -> Self {
        self.max_global_calls = limit;
        self
    }

    pub fn with_cost_threshold(mut self, threshold: Decimal) -> Self {
        self.cost_threshold = Some(threshold);
        self
    }
}

/// Mutable run state the driver threads through the phases
struct RunScratch {
    plan: Option<ProjectPlan>,
    artifacts: Vec<Artifact>,
    completed_files: usize,
    total_files: usize,
}

/// Drive one job from Pending to a terminal state and return it
pub(crate) async fn run_job<C: ModelClient>(
    ctx: PhaseContext<C>,
    mut job: Job,
    locks: Arc<JobLocks>,
    cancel: Arc<AtomicBool>,
) -> Job {
    let mut state = State::Pending;
    let mut event = Event::Start;
    let mut scratch = RunScratch {
        plan: None,
        artifacts: Vec::new(),
        completed_files: 0,
        total_files: 0,
    };

    loop {
        let (next, actions) = transition(state, event);
        state = next;
        sync_job(&mut job, &state);
        save_header(&ctx, &job).await;
        emit_phase(&ctx, &job, &state, &scratch).await;

        if state.is_terminal() {
            return job;
        }

        // Honored between phases only; whatever is in flight finishes
        if cancel.load(Ordering::SeqCst) {
            event = Event::Cancelled;
            continue;
        }

        let Some(action) = actions.into_iter().next() else {
            // The machine pairs every non-terminal state with an action;
            // a stall is treated as cancellation rather than spinning
            event = Event::Cancelled;
            continue;
        };
        event = execute(&ctx, &mut job, &mut scratch, &locks, action).await;
    }
}

/// Run one phase action and produce the event it resolves to
async fn execute<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &mut Job,
    scratch: &mut RunScratch,
    locks: &Arc<JobLocks>,
    action: Action,
) -> Event {
    match action {
        Action::RunPlanning => {
            let (outcome, record) = planning::run_planning(ctx, job).await;
            job.totals.absorb(&record);
            match outcome {
                Ok(plan) => {
                    let total_files = plan.files.len();
                    let artifact = match plan.to_artifact() {
                        Ok(artifact) => artifact,
                        Err(error) => {
                            return Event::PlanFailed {
                                reason: error.to_string(),
                            }
                        }
                    };
                    scratch.artifacts.push(artifact);
                    scratch.total_files = total_files;
                    scratch.plan = Some(plan);
                    Event::PlanReady { total_files }
                }
                Err(error) => Event::PlanFailed {
                    reason: error.to_string(),
                },
            }
        }

        Action::RunCoding { .. } => {
            let Some(plan) = scratch.plan.as_ref() else {
                return Event::PlanFailed {
                    reason: "plan missing after planning".to_string(),
                };
            };
            let outcome = coding::run_coding(ctx, job, plan).await;
            for record in &outcome.records {
                job.totals.absorb(record);
            }
            let completed = outcome.artifacts.len();
            let failed = outcome.failures.len();
            job.failed_files = outcome.failures;
            scratch.completed_files = completed;
            scratch.artifacts.extend(outcome.artifacts);
            Event::CodingFinished { completed, failed }
        }

        Action::RunDocumentation => {
            let Some(plan) = scratch.plan.as_ref() else {
                return Event::PlanFailed {
                    reason: "plan missing after planning".to_string(),
                };
            };
            let outcome = docs::run_documentation(ctx, job, plan).await;
            for record in &outcome.records {
                job.totals.absorb(record);
            }
            job.docs_incomplete = outcome.incomplete;
            scratch.artifacts.extend(outcome.artifacts);
            Event::DocsFinished {
                incomplete: job.docs_incomplete,
            }
        }

        Action::PersistOutputs => {
            // Serialized against regeneration writes for this job
            let gate = locks.write_gate(job.id);
            let _held = gate.lock().await;
            match ctx
                .store
                .replace_artifacts(job.id, scratch.artifacts.clone())
                .await
            {
                Ok(()) => Event::Persisted,
                Err(error) => Event::PersistFailed {
                    reason: error.to_string(),
                },
            }
        }
    }
}

fn sync_job(job: &mut Job, state: &State) {
    match state {
        State::Pending => {}
        State::Planning => job.advance(JobStatus::Planning),
        State::Coding { .. } => job.advance(JobStatus::Coding),
        State::Documenting => job.advance(JobStatus::Documenting),
        State::Persisting => job.advance(JobStatus::Persisting),
        State::Completed => job.advance(JobStatus::Completed),
        State::Failed { reason } => job.fail(reason.clone()),
    }
}

/// Header saves are best effort mid-run; a miss leaves the stored status
/// stale until the next transition. Totals are unaffected either way:
/// the store folds those from the appended records.
async fn save_header<C: ModelClient>(ctx: &PhaseContext<C>, job: &Job) {
    if let Err(error) = ctx.store.save_job(job).await {
        tracing::warn!("Could not save job {} header: {}", job.id, error);
    }
}

async fn emit_phase<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    state: &State,
    scratch: &RunScratch,
) {
    let kind = if state.is_terminal() {
        ProgressKind::Finished {
            failure: job.failure.as_ref().map(|reason| reason.to_string()),
        }
    } else {
        ProgressKind::PhaseEntered
    };
    ctx.bus
        .emit(
            ProgressEvent::new(job.id, job.status, kind)
                .with_counts(scratch.completed_files, scratch.total_files)
                .with_totals(job.totals),
        )
        .await;
}
