//! # sprout-ledger
//!
//! Token/cost accounting for generation sessions.
//!
//! Every dispatcher invocation becomes an immutable [`sprout_core::CallRecord`];
//! the ledger folds records into per-session running totals with a per-task
//! cost breakdown. Totals are read-after-write consistent: a query issued
//! after `record_call` returns always includes that call.

mod ledger;

pub use ledger::{CallParams, CostLedger, LedgerSummary, SessionTotals};
