//! Capabilities and the tool registry
//!
//! A capability is anything a step can name: a local tool (tier 0) or an
//! agent role that needs a routed model backend (tier ≥ 1). Capabilities are
//! trait objects keyed by a globally unique name.
//!
//! ## Built-in set
//! - Tier 0: `echo`, `template`, `json_pick`, `merge`, `write_file`, `http_get`
//! - Tier 1: `summarize`, `plan`
//! - Tier 2: `review`

mod agent;
mod builtin;
mod http;

pub use agent::AgentCapability;
pub use builtin::{EchoTool, JsonPickTool, MergeTool, TemplateTool, WriteFileTool};
pub use http::HttpGetTool;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::contracts::Schema;
use crate::error::FlowError;
use crate::llm::DynModelBackend;

/// Static description of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    /// 0 = runs locally; N ≥ 1 = needs a backend of tier N or above
    pub tier: u8,
    pub description: String,
    pub parameters: Schema,
    #[serde(default)]
    pub result: Schema,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, tier: u8, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tier,
            description: description.into(),
            parameters: Schema::any(),
            result: Schema::any(),
        }
    }

    pub fn with_parameters(mut self, schema: Schema) -> Self {
        self.parameters = schema;
        self
    }

    pub fn with_result(mut self, schema: Schema) -> Self {
        self.result = schema;
        self
    }

    /// Whether invoking this capability needs a model backend
    pub fn needs_model(&self) -> bool {
        self.tier > 0
    }
}

/// Per-invocation information handed to a capability
#[derive(Clone)]
pub struct InvocationContext {
    pub step_id: String,
    pub attempt: u32,
    backend: Option<DynModelBackend>,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("step_id", &self.step_id)
            .field("attempt", &self.attempt)
            .field("backend", &self.backend.as_ref().map(|b| b.id().to_string()))
            .finish()
    }
}

impl InvocationContext {
    pub fn new(step_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            step_id: step_id.into(),
            attempt,
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: DynModelBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// The routed backend; errors for tier 0 invocations
    pub fn model(&self) -> Result<&DynModelBackend, FlowError> {
        self.backend.as_ref().ok_or_else(|| {
            FlowError::capability(self.step_id.clone(), "no model backend was routed for this step")
        })
    }
}

/// A named unit of work a step can invoke
#[async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, FlowError>;
}

/// Type alias for shared capabilities
pub type DynCapability = Arc<dyn Capability>;

struct Entry {
    descriptor: ToolDescriptor,
    capability: DynCapability,
}

/// Name-keyed capability registry
#[derive(Default)]
pub struct ToolRegistry {
    entries: BTreeMap<String, Entry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in capability set
    pub fn discover() -> Result<Self, FlowError> {
        let mut registry = Self::new();
        let builtins: Vec<DynCapability> = vec![
            Arc::new(EchoTool),
            Arc::new(TemplateTool),
            Arc::new(JsonPickTool),
            Arc::new(MergeTool),
            Arc::new(WriteFileTool),
            Arc::new(HttpGetTool::new()),
            Arc::new(AgentCapability::summarize()),
            Arc::new(AgentCapability::plan()),
            Arc::new(AgentCapability::review()),
        ];
        for capability in builtins {
            registry.register(capability)?;
        }
        info!(tools = registry.len(), "Discovered built-in capabilities");
        Ok(registry)
    }

    /// Add a capability; names are globally unique
    pub fn register(&mut self, capability: DynCapability) -> Result<(), FlowError> {
        let descriptor = capability.descriptor();
        if self.entries.contains_key(&descriptor.name) {
            return Err(FlowError::validation(format!(
                "capability '{}' is already registered",
                descriptor.name
            )));
        }
        debug!(name = %descriptor.name, tier = descriptor.tier, "Registered capability");
        self.entries.insert(
            descriptor.name.clone(),
            Entry {
                descriptor,
                capability,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<DynCapability, FlowError> {
        self.entries
            .get(name)
            .map(|e| e.capability.clone())
            .ok_or_else(|| FlowError::not_found("capability", name))
    }

    pub fn descriptor(&self, name: &str) -> Result<&ToolDescriptor, FlowError> {
        self.entries
            .get(name)
            .map(|e| &e.descriptor)
            .ok_or_else(|| FlowError::not_found("capability", name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Descriptors of every capability at or below `tier`, sorted by name
    pub fn list_by_tier(&self, tier: u8) -> Vec<&ToolDescriptor> {
        self.entries
            .values()
            .map(|e| &e.descriptor)
            .filter(|d| d.tier <= tier)
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry handle with hot reload.
///
/// Lookups take a snapshot under the read lock; `reload` swaps the whole
/// registry under the write lock, so a lookup sees either the old or the new
/// set, never a mix.
#[derive(Debug, Clone)]
pub struct SharedToolRegistry {
    inner: Arc<RwLock<Arc<ToolRegistry>>>,
}

impl SharedToolRegistry {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub fn snapshot(&self) -> Arc<ToolRegistry> {
        self.inner.read().clone()
    }

    pub fn reload(&self, registry: ToolRegistry) {
        let tools = registry.len();
        *self.inner.write() = Arc::new(registry);
        info!(tools, "Reloaded tool registry");
    }
}

impl From<ToolRegistry> for SharedToolRegistry {
    fn from(registry: ToolRegistry) -> Self {
        Self::new(registry)
    }
}

impl From<Arc<ToolRegistry>> for SharedToolRegistry {
    fn from(registry: Arc<ToolRegistry>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }
}
