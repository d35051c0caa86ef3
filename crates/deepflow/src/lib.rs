//! deepflow: multi-agent workflow orchestration
//!
//! Workflows are YAML DAGs of steps. Each step names a capability: a local
//! tool (tier 0) or an agent role that runs on a model backend picked by the
//! [`SmartRouter`] from a tiered, self-tuning fallback chain.
//!
//! - [`WorkflowLoader`]: YAML to a validated [`WorkflowDefinition`]
//! - [`DagExecutor`]: bounded-concurrency scheduler with fail-fast / best-effort policies
//! - [`Executor`]: bindings, timeouts, routing and retries per step attempt
//! - [`WorkflowRunner`]: load, run, persist the [`RunRecord`], extract artifacts
//!
//! # Model backends
//!
//! Any Rig agent can serve as a backend through [`RigModelBackend`]:
//!
//! ```rust,ignore
//! use rig::client::{CompletionClient, ProviderClient};
//! use rig::providers::ollama;
//! use deepflow::{ModelDescriptor, RigModelBackend, SmartRouter, RouterConfig};
//!
//! let router = SmartRouter::new(RouterConfig::default());
//! let agent = ollama::Client::from_env().agent("llama3.2").build();
//! router.register(Arc::new(RigModelBackend::new(agent, ModelDescriptor::new("llama3.2", 1))))?;
//!
//! let runner = WorkflowRunner::new(EngineConfig::from_env()?, Arc::new(ToolRegistry::discover()?), Arc::new(router));
//! let record = runner.run_file("research.yaml", inputs).await?;
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod contracts;
pub mod dag;
pub mod error;
pub mod hooks;
pub mod llm;
mod persist;
pub mod router;
pub mod runtime;
pub mod step;
pub mod tools;
pub mod workflow;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, RetryPolicy};
pub use context::ExecutionContext;
pub use contracts::{
    Artifact, PropertySchema, Schema, StepError, StepInput, StepOutput, ToolRequest, ToolResponse, ValueType,
};
pub use dag::{Dag, DagExecutor, StepRunner};
pub use error::{ErrorClass, FlowError};
pub use hooks::{RecordingHook, TracingHook, TransitionEvent, TransitionHook};
pub use llm::{
    CostClass, DynModelBackend, EchoBackend, LatencyClass, ModelBackend, ModelDescriptor, ModelRequest,
    ModelResponse, RigModelBackend, TokenUsage,
};
pub use router::{CallOutcome, ModelStats, RandomSource, RouterConfig, SeededRandom, SequenceRandom, SmartRouter};
pub use runtime::Executor;
pub use step::{StepEvent, StepInstance, StepResult, StepState, Transition};
pub use tools::{
    AgentCapability, Capability, InvocationContext, SharedToolRegistry, ToolDescriptor, ToolRegistry,
};
pub use workflow::{
    Binding, Condition, FailurePolicy, FileRunStore, FsArtifactExtractor, MemoryRunStore, RunRecord, RunStatus,
    RunStore, StepDefinition, WorkflowDefinition, WorkflowLoader, WorkflowRunner,
};
