//! Completion notification.
//!
//! Persists the rendered artifact to blob storage under a fresh key and
//! reports completion to the configured webhook.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use renderq_models::JobId;
use renderq_storage::BlobSink;

use crate::error::{WorkerError, WorkerResult};

/// Completion reporting contract the processor depends on.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Deliver the artifact and report completion. Returns the storage key
    /// the artifact was persisted under.
    async fn notify(&self, job_id: &JobId, artifact_path: &Path) -> WorkerResult<String>;
}

/// Production notifier: blob upload followed by a webhook POST.
pub struct WebhookNotifier<S: BlobSink> {
    sink: S,
    http: Client,
    webhook_url: String,
}

impl<S: BlobSink> WebhookNotifier<S> {
    /// Create a new notifier.
    pub fn new(sink: S, webhook_url: impl Into<String>) -> Self {
        Self {
            sink,
            http: Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl<S: BlobSink> CompletionNotifier for WebhookNotifier<S> {
    async fn notify(&self, job_id: &JobId, artifact_path: &Path) -> WorkerResult<String> {
        // A fresh random key per delivery; caller-supplied filenames are
        // not collision-safe across jobs sharing one bucket.
        let key = format!("{}.mp4", Uuid::new_v4());

        let key = self
            .sink
            .put_file(artifact_path, &key, "video/mp4")
            .await
            .map_err(|e| {
                WorkerError::notify_failed(job_id, format!("artifact upload failed: {}", e))
            })?;

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&json!({
                "jobId": job_id,
                "videoKey": key,
            }))
            .send()
            .await
            .map_err(|e| WorkerError::notify_failed(job_id, format!("webhook POST failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("Completion webhook for job {} returned {}", job_id, status);
            return Err(WorkerError::notify_failed(
                job_id,
                format!("webhook returned {}", status),
            ));
        }

        info!("Reported completion of job {} with key {}", job_id, key);
        Ok(key)
    }
}
