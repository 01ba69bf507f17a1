//! Messages exchanged with the compute unit
//!
//! The serde shape is the wire format:
//!
//! ```text
//! request  {"operation": "load" | "generate", ...fields, "requestId": n}
//! response {"requestId": n, ...resultFields} | {"requestId": n, "error": "..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::compute::{GenerateOptions, PointGeometry};

/// Identifier correlating a request with its response
pub type RequestId = u64;

/// Work the compute unit can perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Operation {
    /// Parse a point-cloud file into vertex buffers
    Load { buffer: Vec<u8> },
    /// Voxelize vertex buffers into a packed world package
    Generate {
        geometry: PointGeometry,
        options: GenerateOptions,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Load { .. } => "load",
            Operation::Generate { .. } => "generate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(flatten)]
    pub operation: Operation,
    pub request_id: RequestId,
}

/// Successful result of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultFields {
    Loaded(PointGeometry),
    Generated { buffer: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Failed { error: String },
    Completed(ResultFields),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    pub fn completed(request_id: RequestId, fields: ResultFields) -> Self {
        Self {
            request_id,
            body: ResponseBody::Completed(fields),
        }
    }

    pub fn failed(request_id: RequestId, error: impl Into<String>) -> Self {
        Self {
            request_id,
            body: ResponseBody::Failed { error: error.into() },
        }
    }
}
