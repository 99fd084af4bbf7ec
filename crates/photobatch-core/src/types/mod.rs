//! Core type definitions used across the PhotoBatch workspace.

pub mod id;

pub use id::{BatchId, JobId};
