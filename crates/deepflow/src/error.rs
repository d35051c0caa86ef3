//! Error taxonomy for the workflow engine
//!
//! Every failure the engine can observe maps to one [`FlowError`] variant.
//! Load-time errors (`Schema`, `NotFound`, `Validation`) abort before any step
//! runs. Runtime errors are recorded in the step's result as an [`ErrorClass`]
//! plus message, and the failure policy decides what happens next.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Serializable classification of a [`FlowError`].
///
/// Stored in step results and run records so a persisted run can be
/// inspected without the original error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Schema,
    NotFound,
    Validation,
    Timeout,
    TransientBackend,
    PermanentBackend,
    NoBackendAvailable,
    Cancelled,
    InvalidStateTransition,
    Capability,
    Io,
    Serialization,
}

impl ErrorClass {
    /// Whether errors of this class may be retried by the step retry policy.
    ///
    /// `Capability` errors carry their own flag, see [`FlowError::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Timeout | ErrorClass::TransientBackend)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Schema => "schema",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Validation => "validation",
            ErrorClass::Timeout => "timeout",
            ErrorClass::TransientBackend => "transient_backend",
            ErrorClass::PermanentBackend => "permanent_backend",
            ErrorClass::NoBackendAvailable => "no_backend_available",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::InvalidStateTransition => "invalid_state_transition",
            ErrorClass::Capability => "capability",
            ErrorClass::Io => "io",
            ErrorClass::Serialization => "serialization",
        };
        f.write_str(s)
    }
}

/// Errors raised by the workflow engine
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed workflow document or payload failing a schema
    #[error("Schema error at {path}: {message}")]
    Schema { path: String, message: String },

    /// Unknown capability, step, backend or run
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// Structurally invalid workflow (cycles, dangling references)
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        /// Cycle path when the failure is a dependency cycle, first node repeated last
        cycle: Vec<String>,
    },

    /// A step attempt exceeded its timeout
    #[error("Step '{step_id}' timed out after {elapsed:?}")]
    Timeout { step_id: String, elapsed: Duration },

    /// Backend failure worth retrying (rate limit, connection reset, 5xx)
    #[error("Transient backend error from '{backend_id}': {message}")]
    TransientBackend { backend_id: String, message: String },

    /// Backend failure that will not go away by itself (auth, entitlement)
    #[error("Permanent backend error from '{backend_id}': {message}")]
    PermanentBackend { backend_id: String, message: String },

    /// Every backend in the fallback chain is excluded or exhausted
    #[error("No backend available for capability '{capability}' at tier {tier}")]
    NoBackendAvailable { capability: String, tier: u8 },

    /// Workflow-scoped cancellation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Illegal step state machine event
    #[error("Invalid state transition for step '{step_id}': {event} in state {from}")]
    InvalidStateTransition {
        step_id: String,
        from: String,
        event: String,
    },

    /// Tool logic failure
    #[error("Capability '{capability}' failed: {message}")]
    Capability {
        capability: String,
        message: String,
        retryable: bool,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FlowError {
    /// Create a schema error
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            cycle: Vec::new(),
        }
    }

    /// Create a validation error naming a dependency cycle
    pub fn cycle(path: Vec<String>) -> Self {
        Self::Validation {
            message: format!("dependency cycle: {}", path.join(" -> ")),
            cycle: path,
        }
    }

    pub fn timeout(step_id: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            step_id: step_id.into(),
            elapsed,
        }
    }

    pub fn transient(backend_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientBackend {
            backend_id: backend_id.into(),
            message: message.into(),
        }
    }

    pub fn permanent(backend_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermanentBackend {
            backend_id: backend_id.into(),
            message: message.into(),
        }
    }

    pub fn no_backend(capability: impl Into<String>, tier: u8) -> Self {
        Self::NoBackendAvailable {
            capability: capability.into(),
            tier,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Create a non-retryable capability error
    pub fn capability(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            capability: capability.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a capability error the retry policy may retry
    pub fn capability_retryable(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            capability: capability.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Classification of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            FlowError::Schema { .. } => ErrorClass::Schema,
            FlowError::NotFound { .. } => ErrorClass::NotFound,
            FlowError::Validation { .. } => ErrorClass::Validation,
            FlowError::Timeout { .. } => ErrorClass::Timeout,
            FlowError::TransientBackend { .. } => ErrorClass::TransientBackend,
            FlowError::PermanentBackend { .. } => ErrorClass::PermanentBackend,
            FlowError::NoBackendAvailable { .. } => ErrorClass::NoBackendAvailable,
            FlowError::Cancelled(_) => ErrorClass::Cancelled,
            FlowError::InvalidStateTransition { .. } => ErrorClass::InvalidStateTransition,
            FlowError::Capability { .. } => ErrorClass::Capability,
            FlowError::Io(_) => ErrorClass::Io,
            FlowError::Serialization(_) => ErrorClass::Serialization,
        }
    }

    /// Check if the step retry policy may retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Capability { retryable, .. } => *retryable,
            other => other.class().is_retryable(),
        }
    }

    /// Check if the error is a load-time error (aborts before any step runs)
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            FlowError::Schema { .. } | FlowError::NotFound { .. } | FlowError::Validation { .. }
        )
    }

    /// Cycle path for validation errors caused by a dependency cycle
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self {
            FlowError::Validation { cycle, .. } if !cycle.is_empty() => Some(cycle),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlowError::timeout("fetch", Duration::from_secs(2));
        assert_eq!(err.to_string(), "Step 'fetch' timed out after 2s");

        let err = FlowError::not_found("capability", "summarise");
        assert_eq!(err.to_string(), "capability not found: summarise");
    }

    #[test]
    fn test_retryable_classes() {
        assert!(FlowError::timeout("a", Duration::from_millis(1)).is_retryable());
        assert!(FlowError::transient("m", "503").is_retryable());
        assert!(!FlowError::permanent("m", "401").is_retryable());
        assert!(!FlowError::cancelled("stop").is_retryable());
        assert!(!FlowError::schema("$.steps", "bad").is_retryable());
        assert!(!FlowError::capability("echo", "boom").is_retryable());
        assert!(FlowError::capability_retryable("http_get", "reset").is_retryable());
    }

    #[test]
    fn test_cycle_error_carries_path() {
        let err = FlowError::cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.class(), ErrorClass::Validation);
        assert_eq!(err.cycle_path().unwrap(), &["a", "b", "a"]);
        assert!(err.to_string().contains("a -> b -> a"));
        assert!(err.is_load_error());
    }

    #[test]
    fn test_error_class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::NoBackendAvailable).unwrap();
        assert_eq!(json, "\"no_backend_available\"");
        assert_eq!(ErrorClass::TransientBackend.to_string(), "transient_backend");
    }
}
