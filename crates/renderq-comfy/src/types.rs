//! Wire types for the ComfyUI HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response from `POST /prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    /// Identifier of the queued prompt; polling is keyed by it
    pub prompt_id: String,
    /// Position in the remote queue
    #[serde(default)]
    pub number: i64,
    /// Per-node validation errors reported at submission time
    #[serde(default)]
    pub node_errors: HashMap<String, serde_json::Value>,
}

/// One entry of the `GET /history/{prompt_id}` response map.
///
/// The service returns `{}` until the prompt has been picked up, so a
/// missing entry means "not ready yet", not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node id
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
    /// Execution status
    pub status: HistoryStatus,
}

impl HistoryEntry {
    /// Whether the remote execution has finished.
    pub fn is_completed(&self) -> bool {
        self.status.completed
    }
}

/// Execution status of a history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    pub completed: bool,
}

/// Output of a single workflow node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Produced files; video outputs are reported under `images` too
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageInfo>>,
}

/// A produced file within a node output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    /// May be absent in malformed node outputs; decodes to empty so the
    /// caller can report the missing filename instead of a parse error
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub output_type: String,
}
