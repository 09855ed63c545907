//! In-memory store for tests and ephemeral runs

use crate::store::{JobStore, StoredJob};
use async_trait::async_trait;
use sprout_core::{Artifact, CallRecord, Job, JobId, Result, SproutError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, StoredJob>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip availability, for exercising `StoreUnavailable` paths
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SproutError::StoreUnavailable(
                "memory store offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        self.check_online()?;
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                // Totals follow the appended records, never the caller's
                // header copy
                let totals = stored.job.totals;
                stored.job = job.clone();
                stored.job.totals = totals;
            }
            None => {
                jobs.insert(job.id, StoredJob::new(job.clone()));
            }
        }
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<StoredJob> {
        self.check_online()?;
        let jobs = self.jobs.read().await;
        jobs.get(&id).cloned().ok_or(SproutError::JobNotFound(id))
    }

    async fn append_call_records(&self, id: JobId, records: &[CallRecord]) -> Result<()> {
        self.check_online()?;
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&id).ok_or(SproutError::JobNotFound(id))?;
        for record in records {
            stored.job.totals.absorb(record);
            stored.records.push(record.clone());
        }
        Ok(())
    }

    async fn replace_artifacts(&self, id: JobId, artifacts: Vec<Artifact>) -> Result<()> {
        self.check_online()?;
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&id).ok_or(SproutError::JobNotFound(id))?;
        for artifact in artifacts {
            match stored
                .artifacts
                .iter_mut()
                .find(|a| a.path == artifact.path)
            {
                Some(slot) => *slot = artifact,
                None => stored.artifacts.push(artifact),
            }
        }
        Ok(())
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        self.check_online()?;
        let mut jobs = self.jobs.write().await;
        jobs.remove(&id)
            .map(|_| ())
            .ok_or(SproutError::JobNotFound(id))
    }

    async fn list_jobs(&self) -> Result<Vec<JobId>> {
        self.check_online()?;
        Ok(self.jobs.read().await.keys().copied().collect())
    }
}
