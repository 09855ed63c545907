//! Filesystem store
//!
//! One JSON document per job under the store root. Writes go to a temp
//! file then rename, so a reader never observes a partially written job.
//! Mutations take an internal lock: concurrent record appends for one
//! job must not lose each other's read-modify-write cycle.

use crate::store::{JobStore, StoredJob};
use async_trait::async_trait;
use sprout_core::{Artifact, CallRecord, Job, JobId, Result, SproutError};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct FileStore {
    root: PathBuf,
    writes: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| unavailable("create store root", &root, e))?;
        tracing::debug!("Job store ready at {}", root.display());
        Ok(Self {
            root,
            writes: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read(&self, id: JobId) -> Result<StoredJob> {
        let path = self.job_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SproutError::JobNotFound(id));
            }
            Err(e) => return Err(unavailable("read job", &path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            SproutError::StoreUnavailable(format!("corrupt job file {}: {}", path.display(), e))
        })
    }

    async fn write(&self, id: JobId, stored: &StoredJob) -> Result<()> {
        let path = self.job_path(id);
        let tmp = self.root.join(format!("{id}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(stored)
            .map_err(|e| SproutError::StoreUnavailable(format!("encode job {id}: {e}")))?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| unavailable("write job", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| unavailable("commit job", &path, e))
    }
}

fn unavailable(action: &str, path: &Path, error: std::io::Error) -> SproutError {
    SproutError::StoreUnavailable(format!("{action} {}: {error}", path.display()))
}

#[async_trait]
impl JobStore for FileStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let _writes = self.writes.lock().await;
        let stored = match self.read(job.id).await {
            Ok(mut stored) => {
                // Totals follow the appended records, never the caller's
                // header copy
                let totals = stored.job.totals;
                stored.job = job.clone();
                stored.job.totals = totals;
                stored
            }
            Err(SproutError::JobNotFound(_)) => StoredJob::new(job.clone()),
            Err(e) => return Err(e),
        };
        self.write(job.id, &stored).await
    }

    async fn load_job(&self, id: JobId) -> Result<StoredJob> {
        self.read(id).await
    }

    async fn append_call_records(&self, id: JobId, records: &[CallRecord]) -> Result<()> {
        let _writes = self.writes.lock().await;
        let mut stored = self.read(id).await?;
        for record in records {
            stored.job.totals.absorb(record);
            stored.records.push(record.clone());
        }
        self.write(id, &stored).await
    }

    async fn replace_artifacts(&self, id: JobId, artifacts: Vec<Artifact>) -> Result<()> {
        let _writes = self.writes.lock().await;
        let mut stored = self.read(id).await?;
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
        self.write(id, &stored).await
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        let _writes = self.writes.lock().await;
        let path = self.job_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted job {id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SproutError::JobNotFound(id))
            }
            Err(e) => Err(unavailable("delete job", &path, e)),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<JobId>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| unavailable("list store root", &self.root, e))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable("list store root", &self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = stem.parse::<JobId>() {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{record_for, sample_job};
    use rust_decimal::Decimal;
    use sprout_core::ArtifactKind;

    async fn temp_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("jobs")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (_dir, store) = temp_store().await;
        let job = sample_job();

        store.save_job(&job).await.unwrap();
        let stored = store.load_job(job.id).await.unwrap();
        assert_eq!(stored.job, job);
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let (_dir, store) = temp_store().await;
        let err = store.load_job(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SproutError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_header_update_preserves_artifacts_and_records() {
        let (_dir, store) = temp_store().await;
        let mut job = sample_job();
        store.save_job(&job).await.unwrap();
        store
            .replace_artifacts(
                job.id,
                vec![Artifact::new("src/a.js", "a", ArtifactKind::CodeFile)],
            )
            .await
            .unwrap();
        store
            .append_call_records(job.id, &[record_for(&job, 10, 5, Decimal::new(1, 3))])
            .await
            .unwrap();

        job.advance(sprout_core::JobStatus::Completed);
        store.save_job(&job).await.unwrap();

        let stored = store.load_job(job.id).await.unwrap();
        assert_eq!(stored.job.status, sprout_core::JobStatus::Completed);
        assert_eq!(stored.artifacts.len(), 1);
        assert_eq!(stored.records.len(), 1);
    }

    #[tokio::test]
    async fn test_append_folds_totals_into_header() {
        let (_dir, store) = temp_store().await;
        let job = sample_job();
        store.save_job(&job).await.unwrap();

        store
            .append_call_records(
                job.id,
                &[
                    record_for(&job, 100, 50, Decimal::new(2, 3)),
                    record_for(&job, 200, 100, Decimal::new(4, 3)),
                ],
            )
            .await
            .unwrap();

        let stored = store.load_job(job.id).await.unwrap();
        assert_eq!(stored.job.totals.input_tokens, 300);
        assert_eq!(stored.job.totals.cost, Decimal::new(6, 3));
    }

    #[tokio::test]
    async fn test_header_save_keeps_record_backed_totals() {
        let (_dir, store) = temp_store().await;
        let mut job = sample_job();
        store.save_job(&job).await.unwrap();
        store
            .append_call_records(job.id, &[record_for(&job, 100, 50, Decimal::new(3, 2))])
            .await
            .unwrap();

        job.totals.input_tokens = 9_999;
        job.totals.cost = Decimal::new(99, 0);
        store.save_job(&job).await.unwrap();

        let stored = store.load_job(job.id).await.unwrap();
        assert_eq!(stored.job.totals.input_tokens, 100);
        assert_eq!(stored.job.totals.cost, Decimal::new(3, 2));
    }

    #[tokio::test]
    async fn test_replace_leaves_other_artifacts_untouched() {
        let (_dir, store) = temp_store().await;
        let job = sample_job();
        store.save_job(&job).await.unwrap();

        store
            .replace_artifacts(
                job.id,
                vec![
                    Artifact::new("src/a.js", "a v1", ArtifactKind::CodeFile),
                    Artifact::new("src/b.js", "b v1", ArtifactKind::CodeFile),
                ],
            )
            .await
            .unwrap();
        store
            .replace_artifacts(
                job.id,
                vec![Artifact::new("src/b.js", "b v2", ArtifactKind::CodeFile)],
            )
            .await
            .unwrap();

        let stored = store.load_job(job.id).await.unwrap();
        assert_eq!(stored.artifact("src/a.js").unwrap().content, "a v1");
        assert_eq!(stored.artifact("src/b.js").unwrap().content, "b v2");
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let (_dir, store) = temp_store().await;
        let first = sample_job();
        let second = sample_job();
        store.save_job(&first).await.unwrap();
        store.save_job(&second).await.unwrap();

        let mut listed = store.list_jobs().await.unwrap();
        listed.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(listed, expected);

        store.delete_job(first.id).await.unwrap();
        assert_eq!(store.list_jobs().await.unwrap(), vec![second.id]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let (_dir, store) = temp_store().await;
        let job = sample_job();
        store.save_job(&job).await.unwrap();

        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            let record = record_for(&job, 10, 5, Decimal::new(1, 3));
            handles.push(tokio::spawn(async move {
                store.append_call_records(record.job_id, &[record]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.load_job(job.id).await.unwrap();
        assert_eq!(stored.records.len(), 8);
        assert_eq!(stored.job.totals.input_tokens, 80);
    }

    #[tokio::test]
    async fn test_corrupt_file_reports_store_unavailable() {
        let (_dir, store) = temp_store().await;
        let job = sample_job();
        store.save_job(&job).await.unwrap();

        let path = store.root().join(format!("{}.json", job.id));
        tokio::fs::write(&path, b"not json").await.unwrap();

        let err = store.load_job(job.id).await.unwrap_err();
        assert!(matches!(err, SproutError::StoreUnavailable(_)));
    }
}
