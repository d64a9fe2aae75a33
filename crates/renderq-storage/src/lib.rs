//! Artifact storage for rendered outputs.
//!
//! This crate provides:
//! - `BlobSink`, the narrow put-object contract the notifier depends on
//! - `StorageClient`, the production S3-compatible implementation

pub mod client;
pub mod error;

pub use client::{BlobSink, StorageClient, StorageConfig};
pub use error::{StorageError, StorageResult};
