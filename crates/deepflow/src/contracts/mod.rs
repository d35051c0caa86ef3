//! Shapes exchanged between components
//!
//! ```text
//! StepInput{ToolRequest} ──params──▶ Capability ──Value──▶ StepOutput{ToolResponse} ──▶ StepResult
//! ```
//!
//! A [`ToolRequest`] names the capability and carries already-resolved
//! parameters; the executor wraps it in a [`StepInput`] per attempt. The
//! [`ToolResponse`] envelope is what the executor records about one
//! invocation, successful or not, and its metadata is kept on the
//! resulting step result.

pub mod schema;

pub use schema::{PropertySchema, Schema, ValueType};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorClass, FlowError};

/// Request to invoke a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool name or agent role
    pub capability: String,
    /// Resolved parameters
    pub params: Value,
}

impl ToolRequest {
    pub fn new(capability: impl Into<String>, params: Value) -> Self {
        Self {
            capability: capability.into(),
            params,
        }
    }
}

/// Serializable error attached to a response or step result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub class: ErrorClass,
    pub message: String,
    /// Whether the retry policy was allowed to retry after this error
    #[serde(default)]
    pub retryable: bool,
}

impl StepError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retryable: class.is_retryable(),
        }
    }
}

impl From<&FlowError> for StepError {
    fn from(err: &FlowError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}

/// Tool result envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
    /// Backend that served the call; `tool:<name>` for tier 0 tools
    pub backend_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolResponse {
    pub fn ok(
        tool_name: impl Into<String>,
        backend_id: impl Into<String>,
        data: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
            backend_id: backend_id.into(),
            tool_name: tool_name.into(),
            metadata: Map::new(),
        }
    }

    pub fn failed(
        tool_name: impl Into<String>,
        backend_id: impl Into<String>,
        error: &FlowError,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(StepError::from(error)),
            duration_ms,
            backend_id: backend_id.into(),
            tool_name: tool_name.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Input envelope handed to a step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    pub step_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub request: ToolRequest,
}

impl StepInput {
    pub fn new(step_id: impl Into<String>, attempt: u32, request: ToolRequest) -> Self {
        Self {
            step_id: step_id.into(),
            attempt,
            request,
        }
    }
}

/// Output envelope produced by a step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub step_id: String,
    pub attempt: u32,
    pub response: ToolResponse,
}

impl StepOutput {
    /// Pair a response with the input it answers
    pub fn new(input: StepInput, response: ToolResponse) -> Self {
        Self {
            step_id: input.step_id,
            attempt: input.attempt,
            response,
        }
    }
}

/// A file-shaped payload found in a step output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub step_id: String,
    pub filename: String,
    pub content: String,
}

impl Artifact {
    /// Collect artifacts from a step output.
    ///
    /// Recognizes `{"artifact": {"filename", "content"}}` and
    /// `{"artifacts": [{"filename", "content"}, ...]}`. Non-string content is
    /// written as pretty JSON. Entries without a filename are ignored.
    pub fn from_output(step_id: &str, output: &Value) -> Vec<Artifact> {
        let mut found = Vec::new();
        if let Some(single) = output.get("artifact") {
            found.extend(Self::from_entry(step_id, single));
        }
        if let Some(Value::Array(items)) = output.get("artifacts") {
            found.extend(items.iter().filter_map(|item| Self::from_entry(step_id, item)));
        }
        found
    }

    fn from_entry(step_id: &str, entry: &Value) -> Option<Artifact> {
        let filename = entry.get("filename")?.as_str()?.to_string();
        let content = match entry.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string_pretty(other).ok()?,
            None => String::new(),
        };
        Some(Artifact {
            step_id: step_id.to_string(),
            filename,
            content,
        })
    }
}
