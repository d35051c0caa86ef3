//! Offline backend that answers without a model.
//!
//! Used by `deepflow run --offline` and in tests. The response is a short
//! deterministic digest of the prompt, so downstream steps have something to
//! bind to.

use async_trait::async_trait;

use super::{ModelBackend, ModelDescriptor, ModelRequest, ModelResponse, TokenUsage};
use crate::error::FlowError;

const PREVIEW_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct EchoBackend {
    descriptor: ModelDescriptor,
}

impl EchoBackend {
    pub fn new(id: impl Into<String>, tier: u8) -> Self {
        Self {
            descriptor: ModelDescriptor::new(id, tier),
        }
    }

    pub fn with_descriptor(descriptor: ModelDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, FlowError> {
        let preview: String = request.prompt.chars().take(PREVIEW_CHARS).collect();
        let words = request.prompt.split_whitespace().count() as u64;
        let content = format!("[{}] {}", self.descriptor.id, preview);
        let produced = content.split_whitespace().count() as u64;
        Ok(ModelResponse::new(content).with_usage(TokenUsage::new(words, produced)))
    }
}
