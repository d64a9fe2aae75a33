//! Queue job payloads.

use serde::{Deserialize, Serialize};

use renderq_models::{JobId, RenderJob};

/// Generic job wrapper for queue storage.
///
/// The serde tag discriminates job kinds on the wire; consumers skip kinds
/// they are not configured for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Render a workflow on the compute service and deliver the output
    RenderVideo(RenderJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::RenderVideo(j) => &j.job_id,
        }
    }

    /// Stable kind name matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::RenderVideo(_) => "render_video",
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::RenderVideo(j) => j.idempotency_key(),
        }
    }
}
