//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing with idempotency deduplication
//! - Consumer-group consumption with ack, retry counting and DLQ
//! - Crash recovery via claiming of stale pending entries

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::QueueJob;
pub use queue::{JobQueue, JobSource, QueueConfig};
