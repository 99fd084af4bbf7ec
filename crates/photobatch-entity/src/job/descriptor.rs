//! Job descriptors as supplied by upstream callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use photobatch_core::types::JobId;

/// Caller-constructed description of one unit of work.
///
/// Any field besides `id`, `type` and `payload` is collected into
/// `attributes` and carried through to the job record untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Caller-chosen identifier; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    /// Processor key; defaults to `image_analysis`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    /// Opaque data handed to the processor.
    #[serde(default)]
    pub payload: Value,
    /// Pass-through metadata.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl JobDescriptor {
    /// Create a descriptor with only a payload.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    /// Set an explicit identifier.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set an explicit job type.
    pub fn with_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    /// Attach a pass-through attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
