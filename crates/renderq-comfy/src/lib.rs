//! Client for a ComfyUI-compatible compute service.
//!
//! This crate provides:
//! - `ComfyApi`, the narrow capability contract the worker depends on
//! - `ComfyClient`, the production HTTP implementation (reqwest)
//! - Wire types for prompt submission and history polling

pub mod client;
pub mod error;
pub mod types;

pub use client::{ComfyApi, ComfyClient, ComfyClientConfig};
pub use error::{ComfyError, ComfyResult};
pub use types::{HistoryEntry, HistoryStatus, ImageInfo, NodeOutput, PromptResponse};
