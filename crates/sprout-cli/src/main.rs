//! Sprout CLI - LLM-driven project generation
//!
//! Usage:
//!   sprout generate "a todo app"       Generate a project from a prompt
//!   sprout status <job>                Show the stored state of a job
//!   sprout show <job>                  Inspect a job's artifacts and calls
//!   sprout regenerate <job> <paths>    Regenerate files of a completed job

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use sprout_core::{Artifact, GenerationRequest, JobStatus};
use sprout_dispatch::{DispatcherConfig, HttpModelClient};
use sprout_pipeline::{GenerationService, PipelineConfig, ProgressEvent, ProgressKind};
use sprout_store::{FileStore, JobStore, StoredJob};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

/// Pricing table refresh period while a generation runs
const PRICING_REFRESH: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "sprout")]
#[command(author, version, about = "LLM-driven project generation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a project from a prompt
    Generate(GenerateArgs),

    /// Show the stored state of a job
    Status {
        /// Job id
        job: Uuid,

        /// Job store directory
        #[arg(long, default_value = ".sprout/jobs")]
        store: PathBuf,
    },

    /// Inspect a job's artifacts and model calls
    Show {
        /// Job id
        job: Uuid,

        /// Print this artifact's content instead of the listing
        #[arg(long, value_name = "PATH")]
        path: Option<String>,

        /// Write the job's artifacts into this directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Job store directory
        #[arg(long, default_value = ".sprout/jobs")]
        store: PathBuf,
    },

    /// Regenerate chosen files of a completed job
    Regenerate {
        /// Job id
        job: Uuid,

        /// Artifact paths to regenerate
        #[arg(required = true)]
        paths: Vec<String>,

        /// Write the job's artifacts into this directory afterwards
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Job store directory
        #[arg(long, default_value = ".sprout/jobs")]
        store: PathBuf,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// What to build
    prompt: String,

    /// Model for the planning call
    #[arg(long, default_value = "gpt-4")]
    planning_model: String,

    /// Model for code generation
    #[arg(long, default_value = "gpt-4")]
    coding_model: String,

    /// Model for documentation (defaults to the coding model)
    #[arg(long)]
    docs_model: Option<String>,

    /// Request inline comments plus an architecture explanation
    #[arg(long)]
    explain: bool,

    /// Ledger session to charge (defaults to the job id)
    #[arg(long)]
    session: Option<String>,

    /// Warn once when session cost crosses this amount (USD)
    #[arg(long)]
    threshold: Option<Decimal>,

    /// Concurrent file generations
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Write generated files into this directory on success
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Job store directory
    #[arg(long, default_value = ".sprout/jobs")]
    store: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Generate(args) => cmd_generate(args).await,
        Commands::Status { job, store } => cmd_status(job, store).await,
        Commands::Show {
            job,
            path,
            output,
            store,
        } => cmd_show(job, path, output, store).await,
        Commands::Regenerate {
            job,
            paths,
            output,
            store,
        } => cmd_regenerate(job, paths, output, store).await,
    }
}

async fn cmd_generate(args: GenerateArgs) -> Result<()> {
    let client = Arc::new(HttpModelClient::from_env());
    let store = Arc::new(
        FileStore::open(&args.store)
            .await
            .context("Failed to open job store")?,
    );

    let mut config = PipelineConfig::default().with_max_concurrent_files(args.concurrency);
    if let Some(limit) = args.threshold {
        config = config.with_cost_threshold(limit);
    }
    let service =
        GenerationService::with_config(client, store, config, DispatcherConfig::default());
    service.start_pricing_refresh(PRICING_REFRESH);

    let mut request = GenerationRequest::new(&args.prompt, &args.planning_model, &args.coding_model)
        .with_explain(args.explain);
    if let Some(model) = args.docs_model {
        request = request.with_documentation_model(model);
    }
    if let Some(session) = args.session {
        request = request.with_session(session);
    }

    // Subscribe before starting so no early event is missed
    let mut events = service.subscribe();
    let id = service
        .start_generation(request)
        .await
        .context("Failed to start generation")?;
    println!("Job {}", id);

    while let Some(event) = events.recv().await {
        if event.job_id != id {
            continue;
        }
        print_progress(&event);
        if matches!(event.kind, ProgressKind::Finished { .. }) {
            break;
        }
    }

    let stored = service
        .job(id)
        .await
        .context("Job missing from the store after the run")?;
    print_summary(&stored);

    let totals = service.session_total(&stored.job.session_id).await;
    println!(
        "  Session {}: {} call(s), ${}",
        stored.job.session_id, totals.calls, totals.cost
    );

    if stored.job.status == JobStatus::Completed {
        if let Some(dir) = args.output {
            export_artifacts(&stored.artifacts, &dir).await?;
        }
    }

    if stored.job.status == JobStatus::Failed {
        let reason = stored
            .job
            .failure
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("Generation failed: {}", reason);
    }

    Ok(())
}

async fn cmd_status(job_id: Uuid, store_dir: PathBuf) -> Result<()> {
    let store = FileStore::open(&store_dir)
        .await
        .context("Failed to open job store")?;
    let stored = store
        .load_job(job_id)
        .await
        .with_context(|| format!("Job {} not found in {}", job_id, store_dir.display()))?;

    print_summary(&stored);
    Ok(())
}

async fn cmd_show(
    job_id: Uuid,
    path: Option<String>,
    output: Option<PathBuf>,
    store_dir: PathBuf,
) -> Result<()> {
    let store = FileStore::open(&store_dir)
        .await
        .context("Failed to open job store")?;
    let stored = store
        .load_job(job_id)
        .await
        .with_context(|| format!("Job {} not found in {}", job_id, store_dir.display()))?;

    if let Some(path) = path {
        let artifact = stored
            .artifacts
            .iter()
            .find(|a| a.path == path)
            .with_context(|| format!("Job has no artifact at {}", path))?;
        print!("{}", artifact.content);
        if !artifact.content.ends_with('\n') {
            println!();
        }
        return Ok(());
    }

    print_summary(&stored);

    if !stored.artifacts.is_empty() {
        println!("  Artifacts:");
        for artifact in &stored.artifacts {
            println!(
                "    {:<9} {:>7}  {}",
                artifact.kind.to_string(),
                format!("{}B", artifact.content.len()),
                artifact.path
            );
        }
    }

    if !stored.records.is_empty() {
        println!("  Calls:");
        for record in &stored.records {
            let outcome = match &record.outcome {
                sprout_core::CallOutcome::Success => "ok".to_string(),
                sprout_core::CallOutcome::Failed { kind } => format!("failed ({})", kind),
            };
            println!(
                "    {:<13} {}  {}in/{}out  ${}  {} retries  {}",
                record.task.to_string(),
                record.model,
                record.usage.input_tokens,
                record.usage.output_tokens,
                record.cost,
                record.retries,
                outcome
            );
        }
    }

    if let Some(dir) = output {
        export_artifacts(&stored.artifacts, &dir).await?;
    }

    Ok(())
}

async fn cmd_regenerate(
    job_id: Uuid,
    paths: Vec<String>,
    output: Option<PathBuf>,
    store_dir: PathBuf,
) -> Result<()> {
    let client = Arc::new(HttpModelClient::from_env());
    let store = Arc::new(
        FileStore::open(&store_dir)
            .await
            .context("Failed to open job store")?,
    );
    let service = GenerationService::new(client, store);

    info!("Regenerating {} path(s) of job {}", paths.len(), job_id);
    let report = service
        .regenerate(job_id, &paths)
        .await
        .context("Regeneration rejected")?;

    for path in &report.updated {
        println!("updated  {}", path);
    }
    for failure in &report.failed {
        println!("failed   {}  ({})", failure.path, failure.error);
    }

    let stored = service.job(job_id).await?;
    println!("Job cost is now ${}", stored.job.totals.cost);

    if let Some(dir) = output {
        export_artifacts(&stored.artifacts, &dir).await?;
    }

    if !report.failed.is_empty() {
        anyhow::bail!(
            "{} of {} path(s) kept their previous content",
            report.failed.len(),
            report.failed.len() + report.updated.len()
        );
    }

    Ok(())
}

fn print_progress(event: &ProgressEvent) {
    match &event.kind {
        ProgressKind::PhaseEntered => println!("==> {}", event.phase),
        ProgressKind::FileCompleted => {
            if let Some(file) = &event.current_file {
                println!(
                    "    [{}/{}] {}",
                    event.completed_files, event.total_files, file
                );
            }
        }
        ProgressKind::FileFailed { error } => {
            if let Some(file) = &event.current_file {
                println!(
                    "    [{}/{}] {} failed: {}",
                    event.completed_files, event.total_files, file, error
                );
            }
        }
        ProgressKind::DocsIncomplete => {
            let doc = event.current_file.as_deref().unwrap_or("documentation");
            println!("    {} skipped after repeated failures", doc);
        }
        ProgressKind::ThresholdCrossed { session_cost } => {
            println!(
                "    session cost ${} crossed the configured threshold",
                session_cost
            );
        }
        ProgressKind::Finished { failure } => match failure {
            Some(reason) => println!("==> failed: {}", reason),
            None => println!("==> completed"),
        },
    }
}

fn print_summary(stored: &StoredJob) {
    let job = &stored.job;
    println!();
    println!("Job {}", job.id);
    println!("  Status: {}", job.status);
    if let Some(reason) = &job.failure {
        println!("  Failure: {}", reason);
    }
    println!("  Prompt: {}", job.prompt);
    println!(
        "  Models: plan={} code={} docs={}",
        job.models.planning, job.models.coding, job.models.documentation
    );
    println!("  Session: {}", job.session_id);
    if job.docs_incomplete {
        println!("  Documentation: incomplete");
    }
    if !job.failed_files.is_empty() {
        println!("  Failed files:");
        for failure in &job.failed_files {
            println!("    {}  ({})", failure.path, failure.error);
        }
    }
    println!(
        "  Tokens: {} in / {} out",
        job.totals.input_tokens, job.totals.output_tokens
    );
    println!("  Cost: ${}", job.totals.cost);
}

/// Write artifacts into `dir`, creating parent directories per the plan's
/// layout. Paths that point outside `dir` are skipped.
async fn export_artifacts(artifacts: &[Artifact], dir: &Path) -> Result<usize> {
    let mut written = 0;
    for artifact in artifacts {
        if !stays_inside(&artifact.path) {
            warn!("Skipping artifact with unsafe path: {}", artifact.path);
            continue;
        }
        let target = dir.join(&artifact.path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, &artifact.content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("wrote    {}", target.display());
        written += 1;
    }
    println!("Exported {} file(s) to {}", written, dir.display());
    Ok(written)
}

/// Reject absolute paths and any `..` component
fn stays_inside(path: &str) -> bool {
    let path = Path::new(path);
    path.is_relative()
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_inside_rejects_escapes() {
        assert!(stays_inside("src/index.js"));
        assert!(stays_inside("docs/SETUP.md"));
        assert!(!stays_inside("/etc/passwd"));
        assert!(!stays_inside("../outside.txt"));
        assert!(!stays_inside("src/../../outside.txt"));
    }

    #[tokio::test]
    async fn test_export_writes_nested_paths_and_skips_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![
            Artifact::new("src/index.js", "code", sprout_core::ArtifactKind::CodeFile),
            Artifact::new("docs/SETUP.md", "setup", sprout_core::ArtifactKind::DocFile),
            Artifact::new("../escape.txt", "nope", sprout_core::ArtifactKind::DocFile),
        ];

        let written = export_artifacts(&artifacts, dir.path()).await.unwrap();

        assert_eq!(written, 2);
        let code = tokio::fs::read_to_string(dir.path().join("src/index.js"))
            .await
            .unwrap();
        assert_eq!(code, "code");
        assert!(dir.path().join("docs/SETUP.md").exists());
    }
}
