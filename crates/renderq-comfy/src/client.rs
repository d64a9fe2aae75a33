//! ComfyUI HTTP client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{ComfyError, ComfyResult};
use crate::types::{HistoryEntry, PromptResponse};

/// Capability contract the worker depends on.
///
/// One production implementation (`ComfyClient`) plus test doubles; the
/// processor never sees the transport.
#[async_trait]
pub trait ComfyApi: Send + Sync {
    /// Upload one input asset so the workflow can reference it by name.
    async fn upload_asset(&self, name: &str, content_base64: &str) -> ComfyResult<()>;

    /// Submit a workflow for execution. The returned prompt id keys all
    /// subsequent history polls.
    async fn submit_workflow(&self, workflow: &serde_json::Value) -> ComfyResult<PromptResponse>;

    /// Fetch the history record for a prompt. `Ok(None)` means the service
    /// has not produced a record yet; keep polling.
    async fn fetch_history(&self, prompt_id: &str) -> ComfyResult<Option<HistoryEntry>>;
}

/// Configuration for the ComfyUI client.
#[derive(Debug, Clone)]
pub struct ComfyClientConfig {
    /// Base URL of the ComfyUI API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for ComfyClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8188".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ComfyClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("COMFYUI_API_URL")
                .unwrap_or_else(|_| "http://localhost:8188".to_string()),
            timeout: Duration::from_secs(
                std::env::var("COMFYUI_API_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

/// Production ComfyUI client.
pub struct ComfyClient {
    http: Client,
    config: ComfyClientConfig,
}

impl ComfyClient {
    /// Create a new client.
    pub fn new(config: ComfyClientConfig) -> ComfyResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ComfyError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ComfyResult<Self> {
        Self::new(ComfyClientConfig::from_env())
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.config.base_url, route)
    }
}

#[async_trait]
impl ComfyApi for ComfyClient {
    async fn upload_asset(&self, name: &str, content_base64: &str) -> ComfyResult<()> {
        let bytes = BASE64
            .decode(content_base64)
            .map_err(|e| ComfyError::InvalidAsset {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")
            .map_err(|e| ComfyError::request_failed(e.to_string()))?;
        let form = Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", "true");

        debug!("Uploading asset '{}' to {}", name, self.url("/upload/image"));

        let response = self
            .http
            .post(self.url("/upload/image"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("Asset upload '{}' rejected with {}", name, status);
            return Err(ComfyError::api_status(status, body));
        }

        Ok(())
    }

    async fn submit_workflow(&self, workflow: &serde_json::Value) -> ComfyResult<PromptResponse> {
        let body = serde_json::json!({ "prompt": workflow });

        debug!("Submitting workflow to {}", self.url("/prompt"));

        let response = self
            .http
            .post(self.url("/prompt"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyError::api_status(status, body));
        }

        let prompt: PromptResponse = response.json().await?;
        Ok(prompt)
    }

    async fn fetch_history(&self, prompt_id: &str) -> ComfyResult<Option<HistoryEntry>> {
        let response = self
            .http
            .get(self.url(&format!("/history/{}", prompt_id)))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyError::api_status(status, body));
        }

        // The history endpoint returns a map keyed by prompt id; an empty
        // map means the prompt has not executed yet.
        let mut history: HashMap<String, HistoryEntry> = response.json().await?;
        Ok(history.remove(prompt_id))
    }
}
