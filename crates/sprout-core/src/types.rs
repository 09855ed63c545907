//! Core type definitions for the Sprout generation pipeline

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job identifier (UUID v4)
pub type JobId = Uuid;

/// Task type a model call serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Planning,
    Coding,
    Documentation,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Coding => write!(f, "coding"),
            Self::Documentation => write!(f, "documentation"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(Self::Planning),
            "coding" => Ok(Self::Coding),
            "documentation" | "docs" => Ok(Self::Documentation),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

/// Lifecycle status of a generation job
///
/// Advances forward only: pending → planning → coding → documenting →
/// persisting → completed, with failed as the absorbing error state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Planning,
    Coding,
    Documenting,
    Persisting,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Task type active in this status, if any
    pub fn active_task(&self) -> Option<TaskType> {
        match self {
            Self::Planning => Some(TaskType::Planning),
            Self::Coding => Some(TaskType::Coding),
            Self::Documenting => Some(TaskType::Documentation),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Planning => write!(f, "planning"),
            Self::Coding => write!(f, "coding"),
            Self::Documenting => write!(f, "documenting"),
            Self::Persisting => write!(f, "persisting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "coding" => Ok(Self::Coding),
            "documenting" => Ok(Self::Documenting),
            "persisting" => Ok(Self::Persisting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Why a job ended in the failed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UserCancelled,
    PlanningFailed(String),
    PersistenceFailed(String),
    InvalidTransition(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserCancelled => write!(f, "cancelled by user"),
            Self::PlanningFailed(msg) => write!(f, "planning failed: {}", msg),
            Self::PersistenceFailed(msg) => write!(f, "persistence failed: {}", msg),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {}", msg),
        }
    }
}

/// Token counts for one model call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-1k-token pricing for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

impl Pricing {
    pub fn new(input_per_1k: Decimal, output_per_1k: Decimal) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of a call at this price, in decimal arithmetic
    pub fn cost_of(&self, usage: TokenUsage) -> Decimal {
        let per_k = Decimal::from(1000u64);
        Decimal::from(usage.input_tokens) * self.input_per_1k / per_k
            + Decimal::from(usage.output_tokens) * self.output_per_1k / per_k
    }
}

/// Outcome of one dispatcher invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failed { kind: String },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Immutable record of one external model invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub session_id: String,
    pub model: String,
    pub task: TaskType,
    pub usage: TokenUsage,
    /// Cost computed from usage and the pricing in effect at record time
    pub cost: Decimal,
    pub outcome: CallOutcome,
    /// Retries performed before the final outcome
    pub retries: u32,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Phase origin of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Plan,
    CodeFile,
    DocFile,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::CodeFile => write!(f, "code_file"),
            Self::DocFile => write!(f, "doc_file"),
        }
    }
}

/// One generated output unit belonging to a job
///
/// Paths are unique within a job; the plan itself is persisted as the
/// `plan.json` artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
    pub kind: ArtifactKind,
    /// Language tag when known
    pub language: Option<String>,
    /// Explanation text captured in explainability mode
    pub explanation: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind,
            language: None,
            explanation: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

/// A planned output that could not be generated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    pub path: String,
    pub error: String,
}

/// Accumulated token/cost totals for a job or session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

impl UsageTotals {
    /// Fold one call record into the running totals
    pub fn absorb(&mut self, record: &CallRecord) {
        self.input_tokens += record.usage.input_tokens;
        self.output_tokens += record.usage.output_tokens;
        self.cost += record.cost;
    }
}

/// Model chosen for each task type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub planning: String,
    pub coding: String,
    pub documentation: String,
}

impl ModelSelection {
    /// Documentation uses the coding model unless overridden
    pub fn new(planning: impl Into<String>, coding: impl Into<String>) -> Self {
        let coding = coding.into();
        Self {
            planning: planning.into(),
            documentation: coding.clone(),
            coding,
        }
    }

    pub fn with_documentation(mut self, model: impl Into<String>) -> Self {
        self.documentation = model.into();
        self
    }

    pub fn for_task(&self, task: TaskType) -> &str {
        match task {
            TaskType::Planning => &self.planning,
            TaskType::Coding => &self.coding,
            TaskType::Documentation => &self.documentation,
        }
    }
}

/// Input accepted by the start-generation surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub planning_model: String,
    pub coding_model: String,
    /// Defaults to the coding model when absent
    pub documentation_model: Option<String>,
    pub explain: bool,
    /// Ledger session; defaults to the job id when absent
    pub session_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        planning_model: impl Into<String>,
        coding_model: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            planning_model: planning_model.into(),
            coding_model: coding_model.into(),
            documentation_model: None,
            explain: false,
            session_id: None,
        }
    }

    pub fn with_documentation_model(mut self, model: impl Into<String>) -> Self {
        self.documentation_model = Some(model.into());
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session_id = Some(session.into());
        self
    }
}

/// One end-to-end generation run from prompt to persisted artifact set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub models: ModelSelection,
    /// Explainability mode: prompts request inline comments plus an
    /// architecture-explanation artifact
    pub explain: bool,
    pub session_id: String,
    pub status: JobStatus,
    /// Set when status is failed
    pub failure: Option<FailureReason>,
    /// Set when documentation calls failed but the job still completed
    pub docs_incomplete: bool,
    /// Planned files that could not be generated
    pub failed_files: Vec<ArtifactFailure>,
    pub totals: UsageTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(request: &GenerationRequest) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut models = ModelSelection::new(&request.planning_model, &request.coding_model);
        if let Some(model) = &request.documentation_model {
            models = models.with_documentation(model);
        }
        Self {
            id,
            prompt: request.prompt.clone(),
            models,
            explain: request.explain,
            session_id: request
                .session_id
                .clone()
                .unwrap_or_else(|| id.to_string()),
            status: JobStatus::Pending,
            failure: None,
            docs_incomplete: false,
            failed_files: Vec::new(),
            totals: UsageTotals::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status, stamping updated_at
    pub fn advance(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Mark the job failed with a reason
    pub fn fail(&mut self, reason: FailureReason) {
        self.status = JobStatus::Failed;
        self.failure = Some(reason);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_formula() {
        // 1500 input at 0.003/1k + 2000 output at 0.015/1k = 0.0345
        let pricing = Pricing::new(Decimal::new(3, 3), Decimal::new(15, 3));
        let cost = pricing.cost_of(TokenUsage::new(1500, 2000));
        assert_eq!(cost, Decimal::new(345, 4));
    }

    #[test]
    fn test_cost_formula_zero_usage() {
        let pricing = Pricing::new(Decimal::new(3, 3), Decimal::new(15, 3));
        assert_eq!(pricing.cost_of(TokenUsage::default()), Decimal::ZERO);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Planning,
            JobStatus::Coding,
            JobStatus::Documenting,
            JobStatus::Persisting,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Persisting.is_terminal());
    }

    #[test]
    fn test_model_selection_documentation_fallback() {
        let models = ModelSelection::new("m1", "m2");
        assert_eq!(models.for_task(TaskType::Documentation), "m2");

        let models = ModelSelection::new("m1", "m2").with_documentation("m3");
        assert_eq!(models.for_task(TaskType::Planning), "m1");
        assert_eq!(models.for_task(TaskType::Coding), "m2");
        assert_eq!(models.for_task(TaskType::Documentation), "m3");
    }

    #[test]
    fn test_job_session_defaults_to_id() {
        let request = GenerationRequest::new("Build a todo app", "m1", "m2");
        let job = Job::new(&request);
        assert_eq!(job.session_id, job.id.to_string());
        assert_eq!(job.status, JobStatus::Pending);

        let request = GenerationRequest::new("Build a todo app", "m1", "m2").with_session("s-1");
        let job = Job::new(&request);
        assert_eq!(job.session_id, "s-1");
    }

    #[test]
    fn test_totals_absorb_record() {
        let pricing = Pricing::new(Decimal::new(1, 3), Decimal::new(2, 3));
        let usage = TokenUsage::new(1000, 500);
        let record = CallRecord {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            session_id: "s".to_string(),
            model: "m".to_string(),
            task: TaskType::Coding,
            usage,
            cost: pricing.cost_of(usage),
            outcome: CallOutcome::Success,
            retries: 0,
            latency_ms: 10,
            recorded_at: Utc::now(),
        };

        let mut totals = UsageTotals::default();
        totals.absorb(&record);
        totals.absorb(&record);
        assert_eq!(totals.input_tokens, 2000);
        assert_eq!(totals.output_tokens, 1000);
        assert_eq!(totals.cost, Decimal::new(4, 3));
    }
}
