//! # sprout-store
//!
//! Persistence backends for generation jobs: a JSON-file store for real
//! runs and an in-memory store for tests, behind one `JobStore` trait.

mod file;
mod memory;
mod store;
#[cfg(test)]
mod testutil;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{JobStore, StoredJob};
