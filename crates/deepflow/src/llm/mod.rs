//! Model backends
//!
//! A [`ModelBackend`] is one routable execution target for tier ≥ 1
//! capabilities. The router only sees its [`ModelDescriptor`]; the executor
//! calls [`ModelBackend::complete`] on whichever backend the router picked.
//!
//! Backends report failures as [`FlowError::TransientBackend`] or
//! [`FlowError::PermanentBackend`] so the router can choose between a short
//! cooldown and a long exclusion.

mod echo;
mod rig_adapter;

pub use echo::EchoBackend;
pub use rig_adapter::RigModelBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::FlowError;

/// Relative cost of calling a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostClass {
    Low,
    #[default]
    Medium,
    High,
}

/// Expected response latency of a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    Fast,
    #[default]
    Standard,
    Slow,
}

/// Static description of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique backend identifier
    pub id: String,
    /// Declared tier (1 = cheapest model-backed tier)
    pub tier: u8,
    #[serde(default)]
    pub cost: CostClass,
    #[serde(default)]
    pub latency: LatencyClass,
    /// Capabilities this backend may serve; empty serves all
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, tier: u8) -> Self {
        Self {
            id: id.into(),
            tier,
            cost: CostClass::default(),
            latency: LatencyClass::default(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_cost(mut self, cost: CostClass) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_latency(mut self, latency: LatencyClass) -> Self {
        self.latency = latency;
        self
    }

    /// Restrict the backend to the given capabilities
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Check if this backend may serve a capability
    pub fn serves(&self, capability: &str) -> bool {
        self.capabilities.is_empty() || self.capabilities.iter().any(|c| c == capability)
    }
}

/// Token usage reported by a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }
}

/// A single completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Completion returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A routable model-backed execution target
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Static description used by the router
    fn descriptor(&self) -> &ModelDescriptor;

    /// Backend identifier
    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Run one completion
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, FlowError>;
}

/// Type alias for shared backends
pub type DynModelBackend = Arc<dyn ModelBackend>;

const PERMANENT_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "entitlement",
    "not entitled",
    "permission denied",
    "model not found",
];

/// Classify a provider error message into a transient or permanent failure.
///
/// Authorization and entitlement failures are permanent; everything else
/// (rate limits, resets, overloaded, 5xx) is treated as transient.
pub fn classify_provider_error(backend_id: &str, message: impl Into<String>) -> FlowError {
    let message = message.into();
    let lowered = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        FlowError::permanent(backend_id, message)
    } else {
        FlowError::transient(backend_id, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_descriptor_serves() {
        let open = ModelDescriptor::new("llama", 1);
        assert!(open.serves("summarize"));

        let narrow = ModelDescriptor::new("coder", 2).with_capabilities(vec!["review".into()]);
        assert!(narrow.serves("review"));
        assert!(!narrow.serves("summarize"));
    }

    #[test]
    fn test_classify_provider_error() {
        assert_eq!(
            classify_provider_error("m", "HTTP 401 Unauthorized").class(),
            ErrorClass::PermanentBackend
        );
        assert_eq!(
            classify_provider_error("m", "account lacks entitlement for model").class(),
            ErrorClass::PermanentBackend
        );
        assert_eq!(
            classify_provider_error("m", "429 Too Many Requests").class(),
            ErrorClass::TransientBackend
        );
        assert_eq!(
            classify_provider_error("m", "connection reset by peer").class(),
            ErrorClass::TransientBackend
        );
    }

    #[test]
    fn test_descriptor_deserializes_with_defaults() {
        let d: ModelDescriptor = serde_json::from_str(r#"{"id": "qwen", "tier": 2}"#).unwrap();
        assert_eq!(d.cost, CostClass::Medium);
        assert_eq!(d.latency, LatencyClass::Standard);
        assert!(d.capabilities.is_empty());
    }
}
