//! Selective regeneration for completed jobs
//!
//! Re-runs the generation calls for named artifact paths using the
//! job's stored plan, model selection and explain flag. Disjoint path
//! sets for one job run concurrently; overlapping sets wait on the
//! path claims. Only the artifacts that regenerated successfully are
//! swapped in; a path that fails keeps its previous artifact.

use crate::coding;
use crate::context::PhaseContext;
use crate::docs;
use crate::locks::JobLocks;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use sprout_core::{
    Artifact, ArtifactFailure, ArtifactKind, CallRecord, Job, JobId, JobStatus, ProjectPlan,
    Result, SproutError, PLAN_PATH,
};
use sprout_dispatch::ModelClient;
use sprout_store::StoredJob;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// What a regeneration run changed
#[derive(Debug, Clone, Serialize)]
pub struct RegenReport {
    /// Paths whose artifacts were replaced
    pub updated: Vec<String>,
    /// Paths that kept their previous artifact, with the error
    pub failed: Vec<ArtifactFailure>,
}

/// Regenerate the named artifact paths of a completed job.
///
/// Precondition violations are rejected before any model call is made.
/// Cost lands on the job's original session, on top of what is already
/// there.
pub(crate) async fn regenerate<C: ModelClient>(
    ctx: &PhaseContext<C>,
    locks: &Arc<JobLocks>,
    job_id: JobId,
    paths: &[String],
) -> Result<RegenReport> {
    let paths = normalize_paths(paths)?;
    let stored = ctx.store.load_job(job_id).await?;
    validate_against(&stored, &paths)?;
    let plan = stored_plan(&stored)?;
    let job = stored.job.clone();

    // Overlapping regenerations for this job queue here
    let _claim = locks.claim_paths(job_id, &paths).await;

    let limiter = Semaphore::new(ctx.config.max_concurrent_files);
    let mut tasks = FuturesUnordered::new();
    for path in &paths {
        // Validated above, so the artifact exists
        let kind = stored.artifact(path).map(|artifact| artifact.kind);
        let limiter = &limiter;
        let job = &job;
        let plan = &plan;
        tasks.push(async move {
            let generated = match coding::acquire_call_slots(ctx, limiter).await {
                Ok(_slots) => regenerate_path(ctx, job, plan, path, kind).await,
                Err(error) => (Err(error), None),
            };
            (path, generated)
        });
    }

    let mut report = RegenReport {
        updated: Vec::new(),
        failed: Vec::new(),
    };
    let mut replacements = Vec::new();
    while let Some((path, (generated, _record))) = tasks.next().await {
        match generated {
            Ok(artifact) => {
                report.updated.push(path.clone());
                replacements.push(artifact);
            }
            Err(error) => {
                tracing::warn!("Regeneration of {} for job {} failed: {}", path, job_id, error);
                report.failed.push(ArtifactFailure {
                    path: path.clone(),
                    error: error.to_string(),
                });
            }
        }
    }
    report.updated.sort();
    report.failed.sort_by(|a, b| a.path.cmp(&b.path));

    // Swap in only what succeeded, serialized against any other store
    // write for this job
    if !replacements.is_empty() {
        let gate = locks.write_gate(job_id);
        let _held = gate.lock().await;
        ctx.store.replace_artifacts(job_id, replacements).await?;
    }

    Ok(report)
}

async fn regenerate_path<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    plan: &ProjectPlan,
    path: &str,
    kind: Option<ArtifactKind>,
) -> (Result<Artifact>, Option<CallRecord>) {
    match kind {
        Some(ArtifactKind::CodeFile) => match plan.file(path) {
            Some(file) => coding::generate_file(ctx, job, plan, file).await,
            None => (
                Err(SproutError::InvalidInput(format!(
                    "{path} is not in the stored plan"
                ))),
                None,
            ),
        },
        Some(ArtifactKind::DocFile) => match docs::generate_doc(ctx, job, plan, path).await {
            Some((generated, record)) => (generated, Some(record)),
            None => (
                Err(SproutError::InvalidInput(format!(
                    "{path} is not a document this job produces"
                ))),
                None,
            ),
        },
        // The plan is guarded by normalize_paths; None cannot happen
        // past validation
        _ => (
            Err(SproutError::InvalidInput(format!(
                "{path} cannot be regenerated"
            ))),
            None,
        ),
    }
}

/// Reject empty input, blank paths and the plan artifact; dedupe while
/// preserving first-occurrence order
fn normalize_paths(paths: &[String]) -> Result<Vec<String>> {
    if paths.is_empty() {
        return Err(SproutError::InvalidInput(
            "no artifact paths to regenerate".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    let mut cleaned = Vec::new();
    for path in paths {
        let path = path.trim();
        if path.is_empty() {
            return Err(SproutError::InvalidInput(
                "artifact path must not be blank".to_string(),
            ));
        }
        if path == PLAN_PATH {
            return Err(SproutError::InvalidInput(format!(
                "{PLAN_PATH} cannot be regenerated"
            )));
        }
        if seen.insert(path.to_string()) {
            cleaned.push(path.to_string());
        }
    }
    Ok(cleaned)
}

fn validate_against(stored: &StoredJob, paths: &[String]) -> Result<()> {
    if stored.job.status != JobStatus::Completed {
        return Err(SproutError::InvalidInput(format!(
            "job {} is {}, only completed jobs can be regenerated",
            stored.job.id, stored.job.status
        )));
    }
    for path in paths {
        if !stored.has_artifact(path) {
            return Err(SproutError::InvalidInput(format!(
                "job {} has no artifact at {}",
                stored.job.id, path
            )));
        }
    }
    Ok(())
}

fn stored_plan(stored: &StoredJob) -> Result<ProjectPlan> {
    let artifact = stored.artifact(PLAN_PATH).ok_or_else(|| {
        SproutError::StoreUnavailable(format!("job {} has no stored plan", stored.job.id))
    })?;
    ProjectPlan::from_artifact(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::testutil::{
        completed_job, context_for, context_for_config, sample_plan, SAMPLE_PLAN_JSON,
    };
    use sprout_dispatch::{MockModelClient, MockReply};
    use sprout_store::{JobStore, MemoryStore};
    use std::time::Duration;

    async fn seeded_store() -> (Arc<MemoryStore>, JobId) {
        let store = Arc::new(MemoryStore::new());
        let (job, artifacts) = completed_job();
        let id = job.id;
        store.save_job(&job).await.unwrap();
        store.replace_artifacts(id, artifacts).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_regenerates_named_paths_and_leaves_others_alone() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(
            MockModelClient::new().with_default(MockReply::Text("fresh content".to_string())),
        );
        let ctx = context_for(Arc::clone(&client), Arc::clone(&store) as _);
        let locks = Arc::new(JobLocks::new());

        let before = store.load_job(id).await.unwrap();
        let untouched = before.artifact("src/routes.js").unwrap().content.clone();

        let report = regenerate(&ctx, &locks, id, &["src/index.js".to_string()])
            .await
            .unwrap();

        assert_eq!(report.updated, vec!["src/index.js"]);
        assert!(report.failed.is_empty());

        let after = store.load_job(id).await.unwrap();
        assert_eq!(after.artifact("src/index.js").unwrap().content, "fresh content");
        assert_eq!(after.artifact("src/routes.js").unwrap().content, untouched);
        // The regeneration call was appended to the job's records
        assert_eq!(after.records.len(), before.records.len() + 1);
    }

    #[tokio::test]
    async fn test_doc_paths_regenerate_with_doc_prompts() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(
            MockModelClient::new().with_default(MockReply::Text("# Fresh README".to_string())),
        );
        let ctx = context_for(Arc::clone(&client), Arc::clone(&store) as _);
        let locks = Arc::new(JobLocks::new());

        let report = regenerate(&ctx, &locks, id, &["README.md".to_string()])
            .await
            .unwrap();

        assert_eq!(report.updated, vec!["README.md"]);
        let after = store.load_job(id).await.unwrap();
        assert_eq!(after.artifact("README.md").unwrap().content, "# Fresh README");
        let calls = client.calls();
        assert!(calls[0].prompt.contains("README GENERATION"));
    }

    #[tokio::test]
    async fn test_plan_artifact_is_off_limits() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(MockModelClient::new());
        let ctx = context_for(Arc::clone(&client), Arc::clone(&store) as _);
        let locks = Arc::new(JobLocks::new());

        let err = regenerate(&ctx, &locks, id, &[PLAN_PATH.to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SproutError::InvalidInput(_)));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_and_incomplete_job_are_rejected() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(MockModelClient::new());
        let ctx = context_for(Arc::clone(&client), Arc::clone(&store) as _);
        let locks = Arc::new(JobLocks::new());

        let err = regenerate(&ctx, &locks, id, &["src/nope.js".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SproutError::InvalidInput(_)));

        // A job that never completed is rejected outright
        let running = crate::testutil::sample_job();
        store.save_job(&running).await.unwrap();
        let err = regenerate(&ctx, &locks, running.id, &["src/index.js".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SproutError::InvalidInput(_)));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_path_keeps_its_previous_artifact() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(
            MockModelClient::new()
                .with_default(MockReply::Text("fresh content".to_string()))
                .with_reply(
                    "**Path:** src/index.js",
                    MockReply::Unavailable("overloaded".to_string()),
                ),
        );
        let ctx = context_for(Arc::clone(&client), Arc::clone(&store) as _);
        let locks = Arc::new(JobLocks::new());

        let before = store.load_job(id).await.unwrap();
        let previous = before.artifact("src/index.js").unwrap().content.clone();

        let report = regenerate(
            &ctx,
            &locks,
            id,
            &["src/index.js".to_string(), "src/routes.js".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(report.updated, vec!["src/routes.js"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "src/index.js");

        let after = store.load_job(id).await.unwrap();
        assert_eq!(after.artifact("src/index.js").unwrap().content, previous);
        assert_eq!(after.artifact("src/routes.js").unwrap().content, "fresh content");
    }

    #[tokio::test]
    async fn test_regeneration_calls_respect_the_global_cap() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(MockModelClient::new().with_default(MockReply::Slow {
            text: "fresh content".to_string(),
            delay: Duration::from_millis(30),
        }));
        let config = PipelineConfig::default().with_max_global_calls(1);
        let ctx = context_for_config(Arc::clone(&client), Arc::clone(&store) as _, config);
        let locks = Arc::new(JobLocks::new());

        let report = regenerate(
            &ctx,
            &locks,
            id,
            &["src/index.js".to_string(), "src/routes.js".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(report.updated.len(), 2);
        // One global slot: the two calls must not overlap
        assert_eq!(client.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_paths_collapse_to_one_call() {
        let (store, id) = seeded_store().await;
        let client = Arc::new(
            MockModelClient::new().with_default(MockReply::Text("fresh content".to_string())),
        );
        let ctx = context_for(Arc::clone(&client), Arc::clone(&store) as _);
        let locks = Arc::new(JobLocks::new());

        let report = regenerate(
            &ctx,
            &locks,
            id,
            &["src/index.js".to_string(), "src/index.js".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(report.updated, vec!["src/index.js"]);
        assert_eq!(client.call_count(), 1);
    }

    // Keep the sample plan in sync with the fixtures above
    #[test]
    fn test_fixture_plan_parses() {
        let plan = sample_plan();
        assert!(plan.file("src/index.js").is_some());
        assert!(SAMPLE_PLAN_JSON.contains("src/routes.js"));
    }
}
