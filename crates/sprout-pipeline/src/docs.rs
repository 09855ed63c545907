//! Documentation phase executor
//!
//! Writes the README and setup guide for every job, an API reference
//! when the plan tagged endpoint files, and an architecture overview in
//! explain mode. Failures degrade the job instead of failing it: the
//! missing document is skipped and the job is marked docs_incomplete.

use crate::context::{call_and_record, PhaseContext};
use crate::events::{ProgressEvent, ProgressKind};
use crate::prompts;
use sprout_core::{Artifact, ArtifactKind, CallRecord, Job, ProjectPlan, Result, TaskType};
use sprout_dispatch::ModelClient;

pub(crate) const README_PATH: &str = "README.md";
pub(crate) const SETUP_PATH: &str = "docs/SETUP.md";
pub(crate) const API_REFERENCE_PATH: &str = "docs/API.md";
pub(crate) const ARCHITECTURE_PATH: &str = "docs/ARCHITECTURE.md";

/// What the documentation phase produced
pub(crate) struct DocsOutcome {
    pub artifacts: Vec<Artifact>,
    pub records: Vec<CallRecord>,
    pub incomplete: bool,
}

/// Documentation paths this job will attempt, in generation order
pub(crate) fn planned_doc_paths(job: &Job, plan: &ProjectPlan) -> Vec<&'static str> {
    let mut paths = vec![README_PATH, SETUP_PATH];
    if plan.has_api_endpoints() {
        paths.push(API_REFERENCE_PATH);
    }
    if job.explain {
        paths.push(ARCHITECTURE_PATH);
    }
    paths
}

/// Generate the documentation set sequentially; docs are cheap and few,
/// and the deterministic order keeps retries readable in the logs.
pub(crate) async fn run_documentation<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    plan: &ProjectPlan,
) -> DocsOutcome {
    let mut outcome = DocsOutcome {
        artifacts: Vec::new(),
        records: Vec::new(),
        incomplete: false,
    };

    // Running totals for the events; `job.totals` already carries the
    // planning and coding records when this phase starts
    let mut totals = job.totals;
    for path in planned_doc_paths(job, plan) {
        let Some((generated, record)) = generate_doc(ctx, job, plan, path).await else {
            continue;
        };
        totals.absorb(&record);
        outcome.records.push(record);
        match generated {
            Ok(artifact) => outcome.artifacts.push(artifact),
            Err(error) => {
                tracing::warn!("Documentation call for {} failed: {}", path, error);
                outcome.incomplete = true;
                ctx.bus
                    .emit(
                        ProgressEvent::new(job.id, job.status, ProgressKind::DocsIncomplete)
                            .with_file(path)
                            .with_totals(totals),
                    )
                    .await;
            }
        }
    }

    outcome
}

/// Generate one documentation artifact. Returns None when `path` is not
/// a documentation path this job could produce. Shared with
/// regeneration.
pub(crate) async fn generate_doc<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
    plan: &ProjectPlan,
    path: &str,
) -> Option<(Result<Artifact>, CallRecord)> {
    let prompt = doc_prompt(job, plan, path)?;
    let call = call_and_record(
        ctx,
        job,
        TaskType::Documentation,
        &prompt,
        ctx.config.max_doc_tokens,
    )
    .await;

    // Markdown is kept as returned; a fence here may be a legitimate
    // code sample inside the document
    let artifact = call.outcome.map(|completion| {
        Artifact::new(path, completion.text.trim(), ArtifactKind::DocFile)
            .with_language("markdown")
    });
    Some((artifact, call.record))
}

fn doc_prompt(job: &Job, plan: &ProjectPlan, path: &str) -> Option<String> {
    match path {
        README_PATH => Some(prompts::build_readme_prompt(plan, &job.prompt)),
        SETUP_PATH => Some(prompts::build_setup_prompt(plan)),
        API_REFERENCE_PATH => Some(prompts::build_api_reference_prompt(plan)),
        ARCHITECTURE_PATH => Some(prompts::build_architecture_prompt(plan, &job.prompt)),
        _ => None,
    }
}
