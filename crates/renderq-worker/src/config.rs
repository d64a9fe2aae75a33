//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
///
/// Read once at startup and passed explicitly into every component.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Completion webhook URL
    pub webhook_url: String,
    /// Base path where the compute service writes output files
    pub output_base_path: PathBuf,
    /// Total history fetches per job before giving up (at least 1)
    pub max_poll_attempts: u32,
    /// Fixed wait between history fetches
    pub poll_interval: Duration,
    /// Queue job kind this worker processes; other kinds are acked and skipped
    pub job_kind: String,
    /// How often to scan for orphaned pending messages
    pub claim_interval: Duration,
    /// Minimum idle time before a pending message can be claimed
    pub claim_min_idle: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            output_base_path: PathBuf::from("/comfyui/output"),
            // At one-second intervals this bounds a job to twenty minutes
            // of polling.
            max_poll_attempts: 1200,
            poll_interval: Duration::from_secs(1),
            job_kind: "render_video".to_string(),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            webhook_url: std::env::var("COMPLETE_WEBHOOK_URL").unwrap_or(defaults.webhook_url),
            output_base_path: std::env::var("COMFYUI_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_base_path),
            max_poll_attempts: std::env::var("MAX_POLL_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_poll_attempts)
                .max(1),
            poll_interval: Duration::from_secs(
                std::env::var("POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            ),
            job_kind: std::env::var("WORKER_JOB_KIND").unwrap_or(defaults.job_kind),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}
