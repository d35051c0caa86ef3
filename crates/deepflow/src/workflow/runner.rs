//! Workflow runner - the top-level entry point
//!
//! ```text
//!  source ─▶ WorkflowLoader ─▶ WorkflowDefinition
//!                                   │
//!  inputs ─▶ ExecutionContext ─▶ Executor + DagExecutor ─▶ RunRecord
//!                                                            │
//!                              RunStore ◀─┬──────────────────┘
//!                     ArtifactExtractor ◀─┘
//! ```
//!
//! Each run works against one snapshot of the tool registry, so a reload
//! through [`WorkflowRunner::tools`] only affects runs started afterwards.
//!
//! Only load failures surface as `Err`; every outcome of an actual run,
//! including failed and cancelled runs, is a [`RunRecord`]. Persistence
//! problems after the run are logged and do not change the record.

use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::artifacts::{ArtifactExtractor, FsArtifactExtractor};
use super::definition::WorkflowDefinition;
use super::loader::WorkflowLoader;
use super::record::{RunRecord, RunRecordBuilder};
use super::store::{FileRunStore, RunStore};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::dag::DagExecutor;
use crate::error::FlowError;
use crate::hooks::{DynHook, TracingHook};
use crate::router::SmartRouter;
use crate::runtime::Executor;
use crate::tools::{SharedToolRegistry, ToolRegistry};

pub struct WorkflowRunner {
    config: EngineConfig,
    tools: SharedToolRegistry,
    router: Arc<SmartRouter>,
    store: Option<Arc<dyn RunStore>>,
    extractor: Option<Arc<dyn ArtifactExtractor>>,
    hooks: Vec<DynHook>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    stats_loaded: AtomicBool,
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("config", &self.config)
            .field("tools", &self.tools.snapshot().names())
            .field("router", &self.router)
            .field("persists_runs", &self.store.is_some())
            .field("extracts_artifacts", &self.extractor.is_some())
            .finish()
    }
}

impl WorkflowRunner {
    /// Runner with the stores the config asks for and the tracing hook
    pub fn new(config: EngineConfig, tools: impl Into<SharedToolRegistry>, router: Arc<SmartRouter>) -> Self {
        let store: Option<Arc<dyn RunStore>> = config.persist_runs.then(|| {
            Arc::new(FileRunStore::new(config.runs_dir()).with_compression(config.compress_runs)) as Arc<dyn RunStore>
        });
        let extractor: Option<Arc<dyn ArtifactExtractor>> = config
            .extract_artifacts
            .then(|| Arc::new(FsArtifactExtractor::new(config.artifacts_dir())) as Arc<dyn ArtifactExtractor>);

        Self {
            config,
            tools: tools.into(),
            router,
            store,
            extractor,
            hooks: vec![Arc::new(TracingHook)],
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            stats_loaded: AtomicBool::new(false),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn without_store(mut self) -> Self {
        self.store = None;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArtifactExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn without_extractor(mut self) -> Self {
        self.extractor = None;
        self
    }

    pub fn with_hook(mut self, hook: DynHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels every run of this runner
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<SmartRouter> {
        &self.router
    }

    /// Registry handle; `reload` on it swaps the tools for later runs
    pub fn tools(&self) -> &SharedToolRegistry {
        &self.tools
    }

    /// Loader over the current registry snapshot
    pub fn loader(&self) -> WorkflowLoader {
        self.loader_for(self.tools.snapshot())
    }

    fn loader_for(&self, registry: Arc<ToolRegistry>) -> WorkflowLoader {
        WorkflowLoader::new(registry).with_config(&self.config)
    }

    /// Load `source` and run it
    pub async fn run(&self, source: &str, inputs: Map<String, Value>) -> Result<RunRecord, FlowError> {
        let registry = self.tools.snapshot();
        let definition = self.loader_for(registry.clone()).load(source)?;
        Ok(self.execute(&definition, inputs, registry).await)
    }

    pub async fn run_file(&self, path: impl AsRef<Path>, inputs: Map<String, Value>) -> Result<RunRecord, FlowError> {
        let registry = self.tools.snapshot();
        let definition = self.loader_for(registry.clone()).load_file(path).await?;
        Ok(self.execute(&definition, inputs, registry).await)
    }

    /// Run an already validated definition
    pub async fn run_definition(&self, definition: &WorkflowDefinition, inputs: Map<String, Value>) -> RunRecord {
        self.execute(definition, inputs, self.tools.snapshot()).await
    }

    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        inputs: Map<String, Value>,
        registry: Arc<ToolRegistry>,
    ) -> RunRecord {
        self.restore_stats().await;

        let run_id = Uuid::new_v4();
        let builder = RunRecordBuilder::new(run_id, &definition.name, self.clock.now())
            .with_failure_policy(definition.failure_policy)
            .with_concurrency(definition.concurrency)
            .with_inputs(Value::Object(inputs.clone()));

        let executor = Executor::new(
            registry,
            self.router.clone(),
            ExecutionContext::new(inputs),
        )
        .with_run(run_id, &definition.name)
        .with_hooks(self.hooks.iter().cloned())
        .with_step_timeout(self.config.step_timeout)
        .with_retry_policy(self.config.retry.clone());

        let scheduler = DagExecutor::new(definition.concurrency, definition.failure_policy)
            .with_clock(self.clock.clone())
            .with_cancellation(self.cancel.clone());

        let record = executor.execute(&definition.dag, &scheduler, builder).await;
        info!(
            run_id = %run_id,
            workflow = %definition.name,
            status = %record.status(),
            attempts = record.total_attempts(),
            "Workflow run complete"
        );

        self.persist(&record).await;
        record
    }

    async fn restore_stats(&self) {
        if !self.config.persist_stats || self.stats_loaded.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.router.load_stats(self.config.stats_path()).await {
            warn!(error = %e, "Could not load router stats, starting fresh");
        }
    }

    async fn persist(&self, record: &RunRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(record).await {
                warn!(run_id = %record.run_id(), error = %e, "Failed to persist run record");
            }
        }

        if let Some(extractor) = &self.extractor {
            match extractor.extract(record.run_id(), record.steps()).await {
                Ok(paths) if !paths.is_empty() => {
                    info!(run_id = %record.run_id(), artifacts = paths.len(), "Extracted artifacts");
                }
                Ok(_) => {}
                Err(e) => warn!(run_id = %record.run_id(), error = %e, "Artifact extraction failed"),
            }
        }

        if self.config.persist_stats {
            if let Err(e) = self.router.save_stats(self.config.stats_path()).await {
                warn!(error = %e, "Failed to save router stats");
            }
        }
    }
}
