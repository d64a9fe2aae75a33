//! Render job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An input asset to upload to the compute service before submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAsset {
    /// Destination filename on the compute service
    pub name: String,
    /// Base64-encoded file content
    pub content_base64: String,
}

impl InputAsset {
    pub fn new(name: impl Into<String>, content_base64: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_base64: content_base64.into(),
        }
    }
}

/// A render job consumed from the queue.
///
/// Owned by a single processor invocation for its lifetime; nothing is
/// shared between jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Workflow graph submitted to the compute service as-is
    pub workflow: serde_json::Value,
    /// Node whose output holds the rendered video
    pub output_node_id: String,
    /// Assets uploaded before submission, in order
    #[serde(default)]
    pub input_assets: Vec<InputAsset>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl RenderJob {
    /// Create a new render job.
    pub fn new(workflow: serde_json::Value, output_node_id: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            workflow,
            output_node_id: output_node_id.into(),
            input_assets: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add input assets.
    pub fn with_input_assets(mut self, assets: Vec<InputAsset>) -> Self {
        self.input_assets = assets;
        self
    }

    /// Generate idempotency key for enqueue deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("render:{}", self.job_id)
    }
}
