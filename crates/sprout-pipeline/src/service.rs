//! Public service surface
//!
//! Owns the dispatcher, ledger, pricing book, store handle and progress
//! bus, and spawns one driver task per accepted job. start_generation
//! validates synchronously, then returns the job id immediately; all
//! model work happens on the spawned driver.

use crate::context::{PhaseContext, ThresholdWatch};
use crate::events::{JobProgress, ProgressBus, ProgressEvent};
use crate::locks::JobLocks;
use crate::pipeline::{run_job, PipelineConfig};
use crate::regen::{self, RegenReport};
use serde::Serialize;
use sprout_core::{
    Artifact, ArtifactFailure, ArtifactKind, GenerationRequest, Job, JobId, JobStatus, Result,
    SproutError, UsageTotals,
};
use sprout_dispatch::{spawn_refresh, Dispatcher, DispatcherConfig, ModelClient, PricingBook};
use sprout_ledger::{CostLedger, SessionTotals};
use sprout_store::{JobStore, StoredJob};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Point-in-time answer to a status query
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Most recently completed file while coding
    pub current_file: Option<String>,
    pub completed_files: Vec<String>,
    pub failed_files: Vec<ArtifactFailure>,
    pub total_files: usize,
    pub docs_incomplete: bool,
    pub failure: Option<String>,
    pub totals: UsageTotals,
}

impl JobStatusReport {
    fn from_progress(job_id: JobId, progress: &JobProgress) -> Self {
        Self {
            job_id,
            status: progress.status,
            current_file: progress.current_file.clone(),
            completed_files: progress.completed_files.clone(),
            failed_files: progress.failed_files.clone(),
            total_files: progress.total_files,
            docs_incomplete: progress.docs_incomplete,
            failure: progress.failure.clone(),
            totals: progress.totals,
        }
    }

    fn from_stored(stored: &StoredJob) -> Self {
        let completed_files: Vec<String> = stored
            .artifacts
            .iter()
            .filter(|artifact| artifact.kind == ArtifactKind::CodeFile)
            .map(|artifact| artifact.path.clone())
            .collect();
        let total_files = completed_files.len() + stored.job.failed_files.len();
        Self {
            job_id: stored.job.id,
            status: stored.job.status,
            current_file: None,
            completed_files,
            failed_files: stored.job.failed_files.clone(),
            total_files,
            docs_incomplete: stored.job.docs_incomplete,
            failure: stored.job.failure.as_ref().map(|reason| reason.to_string()),
            totals: stored.job.totals,
        }
    }
}

/// Generation pipeline front door
pub struct GenerationService<C: ModelClient + 'static> {
    dispatcher: Arc<Dispatcher<C>>,
    ledger: Arc<CostLedger>,
    pricing: Arc<PricingBook>,
    store: Arc<dyn JobStore>,
    bus: Arc<ProgressBus>,
    locks: Arc<JobLocks>,
    config: PipelineConfig,
    global_calls: Arc<Semaphore>,
    cancels: Arc<Mutex<HashMap<JobId, Arc<AtomicBool>>>>,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ModelClient + 'static> GenerationService<C> {
    pub fn new(client: Arc<C>, store: Arc<dyn JobStore>) -> Self {
        Self::with_config(client, store, PipelineConfig::default(), DispatcherConfig::default())
    }

    pub fn with_config(
        client: Arc<C>,
        store: Arc<dyn JobStore>,
        config: PipelineConfig,
        dispatcher_config: DispatcherConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::with_config(client, dispatcher_config)),
            ledger: Arc::new(CostLedger::new()),
            pricing: Arc::new(PricingBook::new()),
            store,
            bus: Arc::new(ProgressBus::new()),
            locks: Arc::new(JobLocks::new()),
            global_calls: Arc::new(Semaphore::new(config.max_global_calls)),
            config,
            cancels: Arc::new(Mutex::new(HashMap::new())),
            refresh: Mutex::new(None),
        }
    }

    /// Start the background pricing refresh, replacing any previous one
    pub fn start_pricing_refresh(&self, every: Duration) {
        let handle = spawn_refresh(
            Arc::clone(&self.pricing),
            Arc::clone(self.dispatcher.client()),
            every,
        );
        if let Some(previous) = self.refresh.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Accept a generation request and return its job id immediately.
    ///
    /// The initial Pending header is saved before this returns, so a
    /// status query for the id always finds the job.
    pub async fn start_generation(&self, request: GenerationRequest) -> Result<JobId> {
        validate_request(&request)?;
        let job = Job::new(&request);
        let id = job.id;
        self.store.save_job(&job).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels.lock().unwrap().insert(id, Arc::clone(&cancel));

        let ctx = self.phase_context();
        let locks = Arc::clone(&self.locks);
        let cancels = Arc::clone(&self.cancels);
        tokio::spawn(async move {
            let finished = run_job(ctx, job, locks, cancel).await;
            cancels.lock().unwrap().remove(&finished.id);
            tracing::info!("Job {} finished as {:?}", finished.id, finished.status);
        });
        Ok(id)
    }

    /// Current status of a job: the live snapshot when this process is
    /// running it, the stored header otherwise
    pub async fn status(&self, job_id: JobId) -> Result<JobStatusReport> {
        if let Some(progress) = self.bus.snapshot(job_id).await {
            return Ok(JobStatusReport::from_progress(job_id, &progress));
        }
        let stored = self.store.load_job(job_id).await?;
        Ok(JobStatusReport::from_stored(&stored))
    }

    /// Artifact set of a completed job. Jobs that failed or are still
    /// running have no retrievable artifacts.
    pub async fn artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>> {
        let stored = self.store.load_job(job_id).await?;
        if stored.job.status != JobStatus::Completed {
            return Err(SproutError::InvalidInput(format!(
                "job {} is {}, artifacts are available once completed",
                job_id, stored.job.status
            )));
        }
        Ok(stored.artifacts)
    }

    /// Request cancellation. Takes effect at the next phase boundary;
    /// a terminal job is left untouched.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        if let Some(flag) = self.cancels.lock().unwrap().get(&job_id) {
            flag.store(true, Ordering::SeqCst);
            return Ok(());
        }
        // Not driven by this process; only report whether the job exists
        self.store.load_job(job_id).await.map(|_| ())
    }

    /// Regenerate the named artifact paths of a completed job
    pub async fn regenerate(&self, job_id: JobId, paths: &[String]) -> Result<RegenReport> {
        let ctx = self.phase_context();
        regen::regenerate(&ctx, &self.locks, job_id, paths).await
    }

    /// Subscribe to every progress event this service emits
    pub fn subscribe(&self) -> UnboundedReceiver<ProgressEvent> {
        self.bus.subscribe()
    }

    /// Full stored record of a job
    pub async fn job(&self, job_id: JobId) -> Result<StoredJob> {
        self.store.load_job(job_id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobId>> {
        self.store.list_jobs().await
    }

    /// Accumulated cost for a ledger session
    pub async fn session_total(&self, session_id: &str) -> SessionTotals {
        self.ledger.session_total(session_id).await
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    fn phase_context(&self) -> PhaseContext<C> {
        PhaseContext {
            dispatcher: Arc::clone(&self.dispatcher),
            ledger: Arc::clone(&self.ledger),
            pricing: Arc::clone(&self.pricing),
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            config: self.config.clone(),
            global_calls: Arc::clone(&self.global_calls),
            // One-shot per run: a regeneration can fire the threshold
            // event again on top of a crossing the original run reported
            threshold: ThresholdWatch::new(self.config.cost_threshold),
        }
    }
}

impl<C: ModelClient + 'static> Drop for GenerationService<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn validate_request(request: &GenerationRequest) -> Result<()> {
    if request.prompt.trim().is_empty() {
        return Err(SproutError::InvalidInput(
            "prompt must not be empty".to_string(),
        ));
    }
    if request.planning_model.trim().is_empty() || request.coding_model.trim().is_empty() {
        return Err(SproutError::InvalidInput(
            "model ids must not be empty".to_string(),
        ));
    }
    if let Some(model) = &request.documentation_model {
        if model.trim().is_empty() {
            return Err(SproutError::InvalidInput(
                "documentation model id must not be empty".to_string(),
            ));
        }
    }
    if let Some(session) = &request.session_id {
        if session.trim().is_empty() {
            return Err(SproutError::InvalidInput(
                "session id must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}
