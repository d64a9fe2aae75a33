//! Render job processing worker.
//!
//! This crate provides:
//! - The job processor state machine (upload, submit, poll, locate, notify)
//! - Completion notification (artifact upload + webhook)
//! - The queue consume loop with ack/retry/DLQ handling
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use notifier::{CompletionNotifier, WebhookNotifier};
pub use processor::{locate_output, process_job};
