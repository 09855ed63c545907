//! Store contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sprout_core::{Artifact, CallRecord, Job, JobId, Result};

/// Everything persisted for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: Job,
    pub artifacts: Vec<Artifact>,
    pub records: Vec<CallRecord>,
}

impl StoredJob {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            artifacts: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn artifact(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    pub fn has_artifact(&self, path: &str) -> bool {
        self.artifact(path).is_some()
    }
}

/// Persistence backend for generation jobs.
///
/// Callers uphold single-writer-per-job discipline (one pipeline driver or
/// one regeneration holds the job's write gate at a time); implementations
/// guarantee only that each individual operation applies atomically.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create the job on first save, overwrite its header afterwards.
    /// Usage totals are store owned once the job exists: they follow the
    /// appended records, not the caller's copy.
    async fn save_job(&self, job: &Job) -> Result<()>;

    async fn load_job(&self, id: JobId) -> Result<StoredJob>;

    /// Append records in the order given, folding their usage into the
    /// stored job totals
    async fn append_call_records(&self, id: JobId, records: &[CallRecord]) -> Result<()>;

    /// Replace artifacts whose paths match, insert the rest, in one step
    async fn replace_artifacts(&self, id: JobId, artifacts: Vec<Artifact>) -> Result<()>;

    async fn delete_job(&self, id: JobId) -> Result<()>;

    async fn list_jobs(&self) -> Result<Vec<JobId>>;
}
