//! Worker error types.
//!
//! Every job-fatal variant carries the job id; failures propagate unchanged
//! to the queue layer, which applies its own redelivery policy.

use thiserror::Error;

use renderq_comfy::ComfyError;
use renderq_models::JobId;
use renderq_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job {job_id}: upload of asset '{asset}' failed: {message}")]
    UploadFailed {
        job_id: JobId,
        asset: String,
        message: String,
    },

    #[error("job {job_id}: workflow submission failed: {message}")]
    SubmissionFailed { job_id: JobId, message: String },

    #[error("job {job_id}: history fetch failed on final attempt {attempt}: {source}")]
    PollFailed {
        job_id: JobId,
        attempt: u32,
        #[source]
        source: ComfyError,
    },

    #[error("job {job_id}: no completion after {attempts} poll attempts")]
    PollTimeout { job_id: JobId, attempts: u32 },

    #[error("job {job_id}: node {node_id} produced no video output")]
    NoVideoOutput { job_id: JobId, node_id: String },

    #[error("job {job_id}: node {node_id} reported an output without a filename")]
    MissingFilename { job_id: JobId, node_id: String },

    #[error("job {job_id}: completion notify failed: {message}")]
    NotifyFailed { job_id: JobId, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn notify_failed(job_id: &JobId, msg: impl Into<String>) -> Self {
        Self::NotifyFailed {
            job_id: job_id.clone(),
            message: msg.into(),
        }
    }
}
