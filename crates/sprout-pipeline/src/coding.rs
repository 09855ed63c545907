//! Coding phase executor
//!
//! Fans the planned files out concurrently, bounded by the per-job file
//! limit and the cross-job call limit. A file whose call fails for good
//! becomes a partial-failure entry; the rest of the job proceeds.

use crate::context::{call_and_record, PhaseContext};
use crate::events::{ProgressEvent, ProgressKind};
use crate::prompts;
use futures::stream::{FuturesUnordered, StreamExt};
use sprout_core::{
    strip_code_fence, Artifact, ArtifactFailure, ArtifactKind, CallRecord, Job, PlannedFile,
    ProjectPlan, Result, SproutError, TaskType,
};
use sprout_dispatch::ModelClient;
use tokio::sync::{Semaphore, SemaphorePermit};

/// What the coding phase produced
pub(crate) struct CodingOutcome {
    pub artifacts: Vec<Artifact>,
    pub failures: Vec<ArtifactFailure>,
    pub records: Vec<CallRecord>,
}

/// Generate every planned file, collecting results in completion order.
///
/// Emits a FileCompleted or FileFailed event per file as it lands. The
/// returned records are the caller's to fold into the job totals.
pub(crate) async fn run_coding<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    plan: &ProjectPlan,
) -> CodingOutcome {
    let limiter = Semaphore::new(ctx.config.max_concurrent_files);
    let total = plan.files.len();

    let mut tasks = FuturesUnordered::new();
    for file in &plan.files {
        let limiter = &limiter;
        tasks.push(async move {
            let generated = match acquire_call_slots(ctx, limiter).await {
                Ok(_slots) => generate_file(ctx, job, plan, file).await,
                Err(error) => (Err(error), None),
            };
            (file, generated)
        });
    }

    let mut outcome = CodingOutcome {
        artifacts: Vec::new(),
        failures: Vec::new(),
        records: Vec::new(),
    };
    let mut totals = job.totals;

    while let Some((file, (generated, record))) = tasks.next().await {
        if let Some(record) = record {
            totals.absorb(&record);
            outcome.records.push(record);
        }
        match generated {
            Ok(artifact) => {
                outcome.artifacts.push(artifact);
                ctx.bus
                    .emit(
                        ProgressEvent::new(job.id, job.status, ProgressKind::FileCompleted)
                            .with_file(&file.path)
                            .with_counts(outcome.artifacts.len(), total)
                            .with_totals(totals),
                    )
                    .await;
            }
            Err(error) => {
                tracing::warn!("File {} failed permanently: {}", file.path, error);
                let error = error.to_string();
                outcome.failures.push(ArtifactFailure {
                    path: file.path.clone(),
                    error: error.clone(),
                });
                ctx.bus
                    .emit(
                        ProgressEvent::new(job.id, job.status, ProgressKind::FileFailed { error })
                            .with_file(&file.path)
                            .with_counts(outcome.artifacts.len(), total)
                            .with_totals(totals),
                    )
                    .await;
            }
        }
    }

    outcome
}

/// Generate one planned file. Shared by the coding phase and by
/// regeneration, which replays the exact same prompt construction.
pub(crate) async fn generate_file<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    plan: &ProjectPlan,
    file: &PlannedFile,
) -> (Result<Artifact>, Option<CallRecord>) {
    let prompt = prompts::build_code_file_prompt(plan, file, job.explain);
    let call = call_and_record(
        ctx,
        job,
        TaskType::Coding,
        &prompt,
        ctx.config.max_code_tokens,
    )
    .await;

    let artifact = call.outcome.map(|completion| {
        let (content, explanation) = prompts::split_explanation(&completion.text);
        let content = strip_code_fence(&content).to_string();
        let mut artifact = Artifact::new(&file.path, content, ArtifactKind::CodeFile);
        if let Some(language) = &file.language {
            artifact = artifact.with_language(language);
        }
        if let Some(explanation) = explanation {
            artifact = artifact.with_explanation(explanation);
        }
        artifact
    });
    (artifact, Some(call.record))
}

/// Take one per-job slot, then one global slot, holding both for the
/// duration of the call. Regeneration shares this path so its calls count
/// against the same global cap.
pub(crate) async fn acquire_call_slots<'a, C: ModelClient>(
    ctx: &'a PhaseContext<C>,
    limiter: &'a Semaphore,
) -> Result<(SemaphorePermit<'a>, SemaphorePermit<'a>)> {
    let slot = limiter
        .acquire()
        .await
        .map_err(|_| SproutError::Unavailable("file limiter closed".to_string()))?;
    let global = ctx
        .global_calls
        .acquire()
        .await
        .map_err(|_| SproutError::Unavailable("call limiter closed".to_string()))?;
    Ok((slot, global))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context_with, explain_job, plan_with_files, sample_job};
    use sprout_core::CallOutcome;
    use sprout_dispatch::{MockModelClient, MockReply};

    #[tokio::test]
    async fn test_fan_out_generates_every_planned_file() {
        let client = MockModelClient::new();
        let ctx = context_with(client);
        let job = sample_job();
        let plan = plan_with_files(&["src/a.js", "src/b.js", "src/c.js"]);
        let mut events = ctx.bus.subscribe();

        let outcome = run_coding(&ctx, &job, &plan).await;

        assert_eq!(outcome.artifacts.len(), 3);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.failures.is_empty());
        let mut paths: Vec<_> = outcome.artifacts.iter().map(|a| a.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["src/a.js", "src/b.js", "src/c.js"]);
        for artifact in &outcome.artifacts {
            assert_eq!(artifact.kind, ArtifactKind::CodeFile);
            assert_eq!(artifact.language.as_deref(), Some("javascript"));
        }

        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            if let ProgressKind::FileCompleted = event.kind {
                completed += 1;
                assert_eq!(event.completed_files, completed);
                assert_eq!(event.total_files, 3);
            }
        }
        assert_eq!(completed, 3);
    }

    #[tokio::test]
    async fn test_one_failed_file_leaves_the_rest_standing() {
        let client = MockModelClient::new().with_reply(
            "**Path:** src/c.js",
            MockReply::Unavailable("overloaded".to_string()),
        );
        let ctx = context_with(client);
        let job = sample_job();
        let plan = plan_with_files(&[
            "src/a.js",
            "src/b.js",
            "src/c.js",
            "src/d.js",
            "src/e.js",
        ]);

        let outcome = run_coding(&ctx, &job, &plan).await;

        assert_eq!(outcome.artifacts.len(), 4);
        assert!(!outcome.artifacts.iter().any(|a| a.path == "src/c.js"));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, "src/c.js");
        assert!(outcome.failures[0].error.contains("overloaded"));
        // The failed call is still on the books
        assert_eq!(outcome.records.len(), 5);
        let failed = outcome
            .records
            .iter()
            .filter(|r| matches!(r.outcome, CallOutcome::Failed { .. }))
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_explanation_is_captured_in_explain_mode() {
        let client = MockModelClient::new().with_default(MockReply::Text(
            "let x = 1;\n<explanation>keeps the counter in module scope</explanation>".to_string(),
        ));
        let ctx = context_with(client);
        let job = explain_job();
        let plan = plan_with_files(&["src/a.js"]);

        let outcome = run_coding(&ctx, &job, &plan).await;

        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].content, "let x = 1;");
        assert_eq!(
            outcome.artifacts[0].explanation.as_deref(),
            Some("keeps the counter in module scope")
        );
    }

    #[tokio::test]
    async fn test_fenced_reply_is_stripped() {
        let client = MockModelClient::new()
            .with_default(MockReply::Text("```js\nconst a = 1;\n```".to_string()));
        let ctx = context_with(client);
        let job = sample_job();
        let plan = plan_with_files(&["src/a.js"]);

        let outcome = run_coding(&ctx, &job, &plan).await;
        assert_eq!(outcome.artifacts[0].content, "const a = 1;");
    }
}
