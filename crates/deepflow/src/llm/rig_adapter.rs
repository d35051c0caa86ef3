//! Rig agent adapter
//!
//! Wraps a Rig `Agent<M>` so any of Rig's providers (Ollama, OpenAI,
//! Anthropic, ...) can be registered with the router as a [`ModelBackend`].
//!
//! ```rust,ignore
//! use rig::client::{CompletionClient, ProviderClient};
//! use rig::providers::ollama;
//! use deepflow::llm::{ModelDescriptor, RigModelBackend};
//!
//! let client = ollama::Client::from_env();
//! let agent = client.agent("llama3.2").build();
//! let backend = RigModelBackend::new(agent, ModelDescriptor::new("llama3.2", 1));
//! router.register(Arc::new(backend))?;
//! ```
//!
//! The agent's preamble is fixed at build time, so a per-request system
//! prompt is prepended to the prompt text.

use async_trait::async_trait;
use std::sync::Arc;

use rig::agent::Agent;
use rig::completion::{CompletionModel, Prompt};

use super::{classify_provider_error, ModelBackend, ModelDescriptor, ModelRequest, ModelResponse};
use crate::error::FlowError;

/// [`ModelBackend`] backed by a Rig agent
pub struct RigModelBackend<M>
where
    M: CompletionModel + Send + Sync,
{
    agent: Arc<Agent<M>>,
    descriptor: ModelDescriptor,
}

impl<M> RigModelBackend<M>
where
    M: CompletionModel + Send + Sync,
{
    pub fn new(agent: Agent<M>, descriptor: ModelDescriptor) -> Self {
        Self {
            agent: Arc::new(agent),
            descriptor,
        }
    }

    /// Get a reference to the inner Rig agent.
    pub fn agent(&self) -> &Agent<M> {
        &self.agent
    }
}

fn compose_prompt(request: &ModelRequest) -> String {
    match &request.system_prompt {
        Some(system) if !system.trim().is_empty() => format!("{}\n\n{}", system.trim(), request.prompt),
        _ => request.prompt.clone(),
    }
}

#[async_trait]
impl<M> ModelBackend for RigModelBackend<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, FlowError> {
        let prompt = compose_prompt(request);

        let content = self
            .agent
            .prompt(&prompt)
            .await
            .map_err(|e| classify_provider_error(&self.descriptor.id, format!("Rig agent error: {}", e)))?;

        Ok(ModelResponse::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prompt_prepends_system() {
        let request = ModelRequest::new("Summarize this.").with_system_prompt("You are terse.");
        assert_eq!(compose_prompt(&request), "You are terse.\n\nSummarize this.");
    }

    #[test]
    fn test_compose_prompt_without_system() {
        let request = ModelRequest::new("Plan the work.").with_system_prompt("   ");
        assert_eq!(compose_prompt(&request), "Plan the work.");
    }
}
