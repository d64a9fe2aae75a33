//! Compute client error types.

use thiserror::Error;

pub type ComfyResult<T> = Result<T, ComfyError>;

#[derive(Debug, Error)]
pub enum ComfyError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Service returned {status}: {body}")]
    ApiStatus { status: u16, body: String },

    #[error("Invalid base64 for asset '{name}': {message}")]
    InvalidAsset { name: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ComfyError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn api_status(status: u16, body: impl Into<String>) -> Self {
        Self::ApiStatus {
            status,
            body: body.into(),
        }
    }
}
