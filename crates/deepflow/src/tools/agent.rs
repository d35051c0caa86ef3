//! Agent roles as capabilities
//!
//! An [`AgentCapability`] is a system prompt plus a prompt template. The
//! template is rendered from the step params and sent to whichever backend
//! the router picked for the step.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::builtin::render_template;
use super::{Capability, InvocationContext, ToolDescriptor};
use crate::contracts::{PropertySchema, Schema};
use crate::error::FlowError;
use crate::llm::ModelRequest;

#[derive(Debug, Clone)]
pub struct AgentCapability {
    role: String,
    tier: u8,
    description: String,
    system_prompt: String,
    prompt_template: String,
    parameters: Schema,
    temperature: Option<f64>,
}

impl AgentCapability {
    pub fn new(
        role: impl Into<String>,
        tier: u8,
        system_prompt: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        let role = role.into();
        Self {
            description: format!("Agent role '{}'", role),
            role,
            tier: tier.max(1),
            system_prompt: system_prompt.into(),
            prompt_template: prompt_template.into(),
            parameters: Schema::any(),
            temperature: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Schema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Condense a text
    pub fn summarize() -> Self {
        Self::new(
            "summarize",
            1,
            "You are a precise summarizer. Keep facts, drop filler, never invent details.",
            "Summarize the following text.\n\n{{text}}",
        )
        .with_description("Summarize a text")
        .with_parameters(
            Schema::any().required_property("text", PropertySchema::any().with_description("Text to summarize")),
        )
    }

    /// Break a topic into steps
    pub fn plan() -> Self {
        Self::new(
            "plan",
            1,
            "You are a research planner. Answer with a short numbered list of concrete steps.",
            "Write a research plan for: {{topic}}",
        )
        .with_description("Draft a plan for a topic")
        .with_parameters(Schema::any().required_property("topic", PropertySchema::string().with_length(Some(1), None)))
    }

    /// Critique a draft
    pub fn review() -> Self {
        Self::new(
            "review",
            2,
            "You are a demanding reviewer. Point out errors and gaps, then give a verdict of accept or revise.",
            "Review the following draft.\n\n{{content}}",
        )
        .with_description("Review a draft and give a verdict")
        .with_parameters(Schema::any().required_property("content", PropertySchema::any()))
    }
}

#[async_trait]
impl Capability for AgentCapability {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.role, self.tier, &self.description)
            .with_parameters(self.parameters.clone())
            .with_result(Schema::any().required_property("content", PropertySchema::string()))
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, FlowError> {
        let backend = ctx.model()?;
        let prompt = render_template(&self.prompt_template, &params, &self.role)?;

        let mut request = ModelRequest::new(prompt).with_system_prompt(&self.system_prompt);
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }

        debug!(role = %self.role, step_id = %ctx.step_id, backend = backend.id(), "Invoking agent");
        let response = backend.complete(&request).await?;

        Ok(json!({
            "role": self.role,
            "content": response.content,
            "usage": response.usage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::llm::EchoBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_agent_renders_prompt_and_calls_backend() {
        let ctx = InvocationContext::new("sum", 1).with_backend(Arc::new(EchoBackend::new("offline", 1)));
        let out = AgentCapability::summarize()
            .invoke(json!({"text": "rust is fast"}), &ctx)
            .await
            .unwrap();

        assert_eq!(out["role"], "summarize");
        let content = out["content"].as_str().unwrap();
        assert!(content.starts_with("[offline]"));
        assert!(content.contains("rust is fast"));
    }

    #[tokio::test]
    async fn test_agent_without_backend_fails() {
        let err = AgentCapability::plan()
            .invoke(json!({"topic": "x"}), &InvocationContext::new("p", 1))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Capability);
    }

    #[test]
    fn test_tier_is_at_least_one() {
        let custom = AgentCapability::new("critic", 0, "sys", "{{x}}");
        assert_eq!(custom.descriptor().tier, 1);
        assert_eq!(AgentCapability::review().descriptor().tier, 2);
    }
}
