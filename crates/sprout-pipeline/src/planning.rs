//! Planning phase executor
//!
//! One model call that must yield a parseable project plan. There is no
//! partial outcome here: a dispatch failure or an unparseable reply is
//! fatal to the job.

use crate::context::{call_and_record, PhaseContext};
use crate::prompts;
use sprout_core::{CallRecord, Job, ProjectPlan, Result, TaskType};
use sprout_dispatch::ModelClient;

/// Run the planning call and parse the structured plan.
///
/// The call record is returned alongside the outcome; a reply that cost
/// tokens but failed to parse is still a billed, successful call.
pub(crate) async fn run_planning<C: ModelClient>(
    ctx: &PhaseContext<C>,
    job: &Job,
) -> (Result<ProjectPlan>, CallRecord) {
    let prompt = prompts::build_planning_prompt(&job.prompt);
    let call = call_and_record(
        ctx,
        job,
        TaskType::Planning,
        &prompt,
        ctx.config.max_plan_tokens,
    )
    .await;

    let outcome = match call.outcome {
        Ok(completion) => ProjectPlan::from_model_output(&completion.text),
        Err(error) => Err(error),
    };
    (outcome, call.record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context_with, sample_job, SAMPLE_PLAN_JSON};
    use sprout_core::{CallOutcome, SproutError};
    use sprout_dispatch::{MockModelClient, MockReply};

    #[tokio::test]
    async fn test_planning_parses_model_reply() {
        let client = MockModelClient::new()
            .with_reply("PROJECT PLANNING", MockReply::Text(SAMPLE_PLAN_JSON.to_string()));
        let ctx = context_with(client);
        let job = sample_job();

        let (outcome, record) = run_planning(&ctx, &job).await;
        let plan = outcome.unwrap();
        assert_eq!(plan.project_name, "todo-app");
        assert_eq!(plan.files.len(), 3);
        assert_eq!(record.outcome, CallOutcome::Success);
        assert_eq!(record.model, "m-plan");
    }

    #[tokio::test]
    async fn test_planning_garbage_reply_is_an_error_but_a_billed_call() {
        let client = MockModelClient::new()
            .with_reply("PROJECT PLANNING", MockReply::Text("not json at all".to_string()));
        let ctx = context_with(client);
        let job = sample_job();

        let (outcome, record) = run_planning(&ctx, &job).await;
        assert!(matches!(outcome, Err(SproutError::InvalidResponse(_))));
        // The model answered; the tokens are real and stay on the books
        assert_eq!(record.outcome, CallOutcome::Success);
        assert!(record.usage.output_tokens > 0);
    }

    #[tokio::test]
    async fn test_planning_dispatch_failure_propagates() {
        let client = MockModelClient::new().with_reply(
            "PROJECT PLANNING",
            MockReply::TokenLimit,
        );
        let ctx = context_with(client);
        let job = sample_job();

        let (outcome, record) = run_planning(&ctx, &job).await;
        assert!(matches!(outcome, Err(SproutError::TokenLimitExceeded { .. })));
        assert!(matches!(record.outcome, CallOutcome::Failed { .. }));
    }
}
