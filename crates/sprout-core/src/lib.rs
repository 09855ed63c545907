//! # sprout-core
//!
//! Core types for the Sprout generation pipeline.
//!
//! Sprout turns a plain-text prompt into a scaffolded project: one planning
//! call produces a structured file plan, coding calls generate the planned
//! files concurrently, documentation calls describe the result, and the
//! whole artifact set is persisted as a single job.
//!
//! This crate holds the value types every other crate shares (jobs,
//! artifacts, call records, pricing) and the unified error type.

mod error;
mod plan;
mod types;

pub use error::{Result, SproutError};
pub use plan::{strip_code_fence, PlannedFile, ProjectPlan, PLAN_PATH};
pub use types::*;
