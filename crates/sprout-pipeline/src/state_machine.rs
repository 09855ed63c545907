//! Pure state machine for the generation pipeline
//!
//! transition(state, event) -> (state, actions), no async, no I/O. The
//! driver in `pipeline` executes the actions and feeds the resulting
//! events back in.
//!
//! - Invalid (state, event) pairs go to Failed, never panic
//! - Terminal states absorb every event
//! - Per-file coding failures are job data, not machine failures

use sprout_core::FailureReason;

/// Pipeline state for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Accepted, not yet started
    Pending,
    /// Producing the project plan
    Planning,
    /// Generating planned files
    Coding { total_files: usize },
    /// Producing README, setup guide and optional references
    Documenting,
    /// Writing the artifact set to the store
    Persisting,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed { reason: FailureReason },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed { .. })
    }
}

/// Events the driver feeds back after executing actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    PlanReady { total_files: usize },
    PlanFailed { reason: String },
    CodingFinished { completed: usize, failed: usize },
    DocsFinished { incomplete: bool },
    Persisted,
    PersistFailed { reason: String },
    Cancelled,
}

/// Side effects the driver must run after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RunPlanning,
    RunCoding { total_files: usize },
    RunDocumentation,
    PersistOutputs,
}

/// Pure state transition function
///
/// Deterministic, side-effect free. Any invalid pair lands in Failed with
/// an invalid-transition reason instead of panicking.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        // Cancellation wins from any non-terminal state
        (state, Event::Cancelled) if !state.is_terminal() => (
            State::Failed {
                reason: FailureReason::UserCancelled,
            },
            vec![],
        ),

        (State::Pending, Event::Start) => (State::Planning, vec![Action::RunPlanning]),

        (State::Planning, Event::PlanReady { total_files }) => (
            State::Coding { total_files },
            vec![Action::RunCoding { total_files }],
        ),
        // Planning is the one phase whose failure is fatal to the job
        (State::Planning, Event::PlanFailed { reason }) => (
            State::Failed {
                reason: FailureReason::PlanningFailed(reason),
            },
            vec![],
        ),

        // Failed files ride on the job as partial-failure entries; the
        // pipeline advances regardless
        (State::Coding { .. }, Event::CodingFinished { .. }) => {
            (State::Documenting, vec![Action::RunDocumentation])
        }

        (State::Documenting, Event::DocsFinished { .. }) => {
            (State::Persisting, vec![Action::PersistOutputs])
        }

        (State::Persisting, Event::Persisted) => (State::Completed, vec![]),
        (State::Persisting, Event::PersistFailed { reason }) => (
            State::Failed {
                reason: FailureReason::PersistenceFailed(reason),
            },
            vec![],
        ),

        // Terminal states absorb everything
        (state @ State::Completed, _) | (state @ State::Failed { .. }, _) => (state, vec![]),

        (state, event) => (
            State::Failed {
                reason: FailureReason::InvalidTransition(format!(
                    "{:?} cannot handle {:?}",
                    state, event
                )),
            },
            vec![],
        ),
    }
}
