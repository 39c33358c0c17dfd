//! Worker pool and the subordinate-process protocol.

pub mod pool;
pub mod proto;
pub mod runtime;

pub use pool::WorkerPool;
