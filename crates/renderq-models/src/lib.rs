//! Shared data models for the RenderQ worker.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers
//! - Render jobs and their input assets

pub mod job;

pub use job::{InputAsset, JobId, RenderJob};
