//! # In-Memory Backends
//!
//! Process-local implementations of every collaborator trait. They honour the
//! same atomicity and idempotency contracts as the Redis ones, which makes
//! them the backends for tests and for single-process local runs.
mod index;
mod log;
mod store;

pub use index::MemoryIndex;
pub use log::MemoryLog;
pub use store::MemoryStore;
