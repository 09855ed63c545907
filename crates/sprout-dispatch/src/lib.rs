//! # sprout-dispatch
//!
//! Model request dispatch for sprout: a retrying dispatcher with
//! per-attempt deadlines and per-model instability tracking, the HTTP
//! client behind it, a scripted mock for tests, and the refreshable
//! pricing table cost accounting reads from.

mod client;
mod dispatcher;
mod mock;
mod pricing;
mod stability;
mod types;

pub use client::{HttpModelClient, ModelClient};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig};
pub use mock::{MockModelClient, MockReply};
pub use pricing::{default_pricing, spawn_refresh, PricingBook};
pub use stability::{ModelStability, ModelState};
pub use types::{Completion, CompletionRequest, RawCompletion};
