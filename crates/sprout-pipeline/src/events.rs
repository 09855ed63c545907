//! Progress events and the bus that fans them out
//!
//! The driver emits an event on every phase transition and file
//! completion. Emission never blocks on listeners: each event goes to
//! subscribers over unbounded channels, and job-scoped events fold into a
//! snapshot map that status queries read. A terminal event retires the
//! job's snapshot; the stored header answers for the job from then on.
//! Delivery to subscribers is at-least-once, ordered per job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sprout_core::{ArtifactFailure, JobId, JobStatus, UsageTotals};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

/// What a progress event reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// The pipeline entered a new phase
    PhaseEntered,
    /// One planned file was generated
    FileCompleted,
    /// One planned file failed permanently
    FileFailed { error: String },
    /// A documentation call failed; the job continues degraded
    DocsIncomplete,
    /// Session cost crossed the configured threshold (fires once per run).
    /// `session_cost` spans every job charging the session; the event's
    /// `totals` stay job scoped.
    ThresholdCrossed { session_cost: Decimal },
    /// The job reached a terminal status
    Finished { failure: Option<String> },
}

/// One progress notification for a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub phase: JobStatus,
    /// File this event concerns, when it concerns one
    pub current_file: Option<String>,
    pub completed_files: usize,
    pub total_files: usize,
    /// Totals of the job this event concerns, accumulated so far
    pub totals: UsageTotals,
    pub kind: ProgressKind,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, phase: JobStatus, kind: ProgressKind) -> Self {
        Self {
            job_id,
            phase,
            current_file: None,
            completed_files: 0,
            total_files: 0,
            totals: UsageTotals::default(),
            kind,
            at: Utc::now(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.current_file = Some(path.into());
        self
    }

    pub fn with_counts(mut self, completed_files: usize, total_files: usize) -> Self {
        self.completed_files = completed_files;
        self.total_files = total_files;
        self
    }

    pub fn with_totals(mut self, totals: UsageTotals) -> Self {
        self.totals = totals;
        self
    }
}

/// Live view of one job, folded from its progress events
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub status: JobStatus,
    /// Most recently completed file while coding
    pub current_file: Option<String>,
    pub completed_files: Vec<String>,
    pub failed_files: Vec<ArtifactFailure>,
    pub total_files: usize,
    pub docs_incomplete: bool,
    /// Failure reason once the job finishes as Failed
    pub failure: Option<String>,
    pub totals: UsageTotals,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    fn new() -> Self {
        Self {
            status: JobStatus::Pending,
            current_file: None,
            completed_files: Vec::new(),
            failed_files: Vec::new(),
            total_files: 0,
            docs_incomplete: false,
            failure: None,
            totals: UsageTotals::default(),
            updated_at: Utc::now(),
        }
    }

    fn fold(&mut self, event: &ProgressEvent) {
        self.status = event.phase;
        self.totals = event.totals;
        self.updated_at = event.at;
        if event.total_files > 0 {
            self.total_files = event.total_files;
        }
        match &event.kind {
            ProgressKind::PhaseEntered => {
                self.current_file = None;
            }
            ProgressKind::Finished { failure } => {
                self.current_file = None;
                self.failure = failure.clone();
            }
            ProgressKind::FileCompleted => {
                if let Some(path) = &event.current_file {
                    self.completed_files.push(path.clone());
                    self.current_file = Some(path.clone());
                }
            }
            ProgressKind::FileFailed { error } => {
                if let Some(path) = &event.current_file {
                    self.failed_files.push(ArtifactFailure {
                        path: path.clone(),
                        error: error.clone(),
                    });
                }
            }
            ProgressKind::DocsIncomplete => {
                self.docs_incomplete = true;
            }
            // Session scoped; `emit` keeps these away from the snapshots
            ProgressKind::ThresholdCrossed { .. } => {}
        }
    }
}

/// Snapshot fold plus subscriber fan-out
pub struct ProgressBus {
    snapshots: RwLock<HashMap<JobId, JobProgress>>,
    subscribers: Mutex<Vec<UnboundedSender<ProgressEvent>>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Stream of all future events, across jobs
    pub fn subscribe(&self) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Fold the event into the job snapshot and forward it to subscribers.
    ///
    /// `Finished` retires the snapshot instead: the caller has already
    /// persisted the terminal header, which stays correct across later
    /// regenerations while a folded entry would not. Threshold crossings
    /// carry a session-wide figure and never touch the snapshots.
    pub async fn emit(&self, event: ProgressEvent) {
        {
            let mut snapshots = self.snapshots.write().await;
            match &event.kind {
                ProgressKind::Finished { .. } => {
                    snapshots.remove(&event.job_id);
                }
                ProgressKind::ThresholdCrossed { .. } => {}
                _ => {
                    snapshots
                        .entry(event.job_id)
                        .or_insert_with(JobProgress::new)
                        .fold(&event);
                }
            }
        }
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub async fn snapshot(&self, job_id: JobId) -> Option<JobProgress> {
        self.snapshots.read().await.get(&job_id).cloned()
    }
}
