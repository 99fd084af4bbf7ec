//! Job domain entities.

pub mod descriptor;
pub mod model;
pub mod status;

pub use descriptor::JobDescriptor;
pub use model::{DEFAULT_JOB_TYPE, Job, JobFailure};
pub use status::JobStatus;
