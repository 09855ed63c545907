//! Shared fixtures for the pipeline tests

use crate::context::{PhaseContext, ThresholdWatch};
use crate::events::ProgressBus;
use crate::pipeline::PipelineConfig;
use sprout_core::{
    Artifact, ArtifactKind, GenerationRequest, Job, JobStatus, PlannedFile, ProjectPlan,
};
use sprout_dispatch::{Dispatcher, DispatcherConfig, MockModelClient, PricingBook};
use sprout_ledger::CostLedger;
use sprout_store::{JobStore, MemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub(crate) const SAMPLE_PLAN_JSON: &str = r#"{
    "project_name": "todo-app",
    "stack": ["node", "express"],
    "directories": ["src", "docs"],
    "files": [
        {"path": "src/index.js", "purpose": "entry point", "language": "javascript"},
        {"path": "src/routes.js", "purpose": "REST endpoints", "language": "javascript", "api_endpoint": true},
        {"path": "src/store.js", "purpose": "task persistence", "language": "javascript"}
    ],
    "dependencies": {"express": "^4.18.0"}
}"#;

pub(crate) fn sample_plan() -> ProjectPlan {
    ProjectPlan::from_model_output(SAMPLE_PLAN_JSON).unwrap()
}

pub(crate) fn sample_job() -> Job {
    Job::new(&GenerationRequest::new("build a todo app", "m-plan", "m-code"))
}

pub(crate) fn explain_job() -> Job {
    Job::new(&GenerationRequest::new("build a todo app", "m-plan", "m-code").with_explain(true))
}

/// Completed job with the artifact set a finished run would have left
pub(crate) fn completed_job() -> (Job, Vec<Artifact>) {
    let mut job = sample_job();
    job.advance(JobStatus::Completed);

    let plan = sample_plan();
    let mut artifacts = vec![plan.to_artifact().unwrap()];
    for file in &plan.files {
        artifacts.push(
            Artifact::new(&file.path, format!("// {}", file.path), ArtifactKind::CodeFile)
                .with_language("javascript"),
        );
    }
    artifacts.push(Artifact::new("README.md", "# todo-app", ArtifactKind::DocFile));
    artifacts.push(Artifact::new("docs/SETUP.md", "# Setup", ArtifactKind::DocFile));
    artifacts.push(Artifact::new("docs/API.md", "# API", ArtifactKind::DocFile));
    (job, artifacts)
}

pub(crate) fn plan_with_files(paths: &[&str]) -> ProjectPlan {
    ProjectPlan {
        project_name: "todo-app".to_string(),
        stack: vec!["node".to_string()],
        directories: vec!["src".to_string()],
        files: paths
            .iter()
            .map(|path| PlannedFile {
                path: path.to_string(),
                purpose: format!("{path} module"),
                language: Some("javascript".to_string()),
                api_endpoint: false,
            })
            .collect(),
        dependencies: BTreeMap::new(),
    }
}

pub(crate) fn plan_with_endpoints() -> ProjectPlan {
    let mut plan = plan_with_files(&["src/index.js"]);
    plan.files.push(PlannedFile {
        path: "src/routes.js".to_string(),
        purpose: "REST endpoints".to_string(),
        language: Some("javascript".to_string()),
        api_endpoint: true,
    });
    plan
}

pub(crate) fn context_with(client: MockModelClient) -> PhaseContext<MockModelClient> {
    context_for(Arc::new(client), Arc::new(MemoryStore::new()))
}

pub(crate) fn context_for(
    client: Arc<MockModelClient>,
    store: Arc<dyn JobStore>,
) -> PhaseContext<MockModelClient> {
    context_for_config(client, store, PipelineConfig::default())
}

/// Context with millisecond backoff so retry exhaustion stays fast
pub(crate) fn context_for_config(
    client: Arc<MockModelClient>,
    store: Arc<dyn JobStore>,
    config: PipelineConfig,
) -> PhaseContext<MockModelClient> {
    let dispatcher_config = DispatcherConfig::default()
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2));
    PhaseContext {
        dispatcher: Arc::new(Dispatcher::with_config(client, dispatcher_config)),
        ledger: Arc::new(CostLedger::new()),
        pricing: Arc::new(PricingBook::new()),
        store,
        bus: Arc::new(ProgressBus::new()),
        global_calls: Arc::new(Semaphore::new(config.max_global_calls)),
        threshold: ThresholdWatch::new(config.cost_threshold),
        config,
    }
}
