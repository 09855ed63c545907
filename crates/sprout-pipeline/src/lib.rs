//! # sprout-pipeline
//!
//! The generation pipeline: a pure state machine walked by one driver
//! task per job, phase executors for planning, coding and
//! documentation, selective regeneration for completed jobs, and the
//! service front door that ties them to the dispatcher, ledger and
//! store.

mod coding;
mod context;
mod docs;
mod events;
mod locks;
mod pipeline;
mod planning;
mod prompts;
mod regen;
mod service;
mod state_machine;
#[cfg(test)]
mod testutil;

pub use events::{JobProgress, ProgressBus, ProgressEvent, ProgressKind};
pub use locks::{JobLocks, PathClaimGuard};
pub use pipeline::PipelineConfig;
pub use regen::RegenReport;
pub use service::{GenerationService, JobStatusReport};
pub use state_machine::{transition, Action, Event, State};
