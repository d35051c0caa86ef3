use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::contracts::{StepError, StepOutput, ToolResponse};
use crate::error::FlowError;

/// Outcome of a step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
    /// Backend that served the attempt, if any was chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    /// Carried over from the tool response, e.g. `fallback_from`
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StepResult {
    pub fn success(output: Value, duration: Duration, backend_id: Option<String>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            duration_ms: duration.as_millis() as u64,
            backend_id,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: &FlowError, duration: Duration, backend_id: Option<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(StepError::from(error)),
            duration_ms: duration.as_millis() as u64,
            backend_id,
            metadata: Map::new(),
        }
    }

    /// Whether the retry policy may retry after this result
    pub fn is_retryable(&self) -> bool {
        !self.success && self.error.as_ref().is_some_and(|e| e.retryable)
    }
}

impl From<ToolResponse> for StepResult {
    fn from(response: ToolResponse) -> Self {
        Self {
            success: response.success,
            output: response.data,
            error: response.error,
            duration_ms: response.duration_ms,
            backend_id: Some(response.backend_id),
            metadata: response.metadata,
        }
    }
}

impl From<StepOutput> for StepResult {
    fn from(output: StepOutput) -> Self {
        Self::from(output.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{StepInput, ToolRequest};
    use serde_json::json;

    #[test]
    fn test_response_metadata_is_kept() {
        let input = StepInput::new("draft", 2, ToolRequest::new("summarize", json!({"text": "t"})));
        let response = ToolResponse::ok("summarize", "large", json!({"content": "c"}), 40)
            .with_metadata("fallback_from", json!(["small"]));

        let result = StepResult::from(StepOutput::new(input, response));
        assert!(result.success);
        assert_eq!(result.backend_id.as_deref(), Some("large"));
        assert_eq!(result.metadata["fallback_from"], json!(["small"]));

        let restored: StepResult = serde_json::from_value(serde_json::to_value(&result).unwrap()).unwrap();
        assert_eq!(restored, result);
    }

    #[test]
    fn test_plain_results_have_no_metadata() {
        let result = StepResult::failure(&FlowError::capability("echo", "boom"), Duration::ZERO, None);
        assert!(result.metadata.is_empty());
        assert!(serde_json::to_value(&result).unwrap().get("metadata").is_none());
        assert!(!result.is_retryable());
    }
}
