//! # photobatch-entity
//!
//! Data model for PhotoBatch: job descriptors as submitted by callers, the
//! job records the processor drives through their lifecycle, and the
//! read-only batch views handed to observers and status endpoints.

pub mod batch;
pub mod job;
