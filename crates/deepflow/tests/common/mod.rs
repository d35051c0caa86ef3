//! Shared fixtures for the integration tests: scripted capabilities and a
//! runner wired to offline backends.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deepflow::{
    Capability, EchoBackend, EngineConfig, FlowError, InvocationContext, RouterConfig, SequenceRandom, SmartRouter,
    ToolDescriptor, ToolRegistry, WorkflowRunner,
};

/// Fails with a retryable error a fixed number of times, then succeeds
pub struct FlakyTool {
    name: String,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyTool {
    pub fn new(name: &str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for FlakyTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.name, 0, "Fails a scripted number of times, then echoes its params")
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(FlowError::capability_retryable(&self.name, "scripted failure"));
        }
        Ok(json!({ "ok": true, "step": ctx.step_id, "params": params }))
    }
}

/// Always fails with a non-retryable error
pub struct BrokenTool;

#[async_trait]
impl Capability for BrokenTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("broken", 0, "Always fails")
    }

    async fn invoke(&self, _params: Value, _ctx: &InvocationContext) -> Result<Value, FlowError> {
        Err(FlowError::capability("broken", "always fails"))
    }
}

/// Sleeps, recording start/end order and peak parallelism
pub struct SlowTool {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Position of an event in the log
    pub fn position(&self, event: &str) -> usize {
        self.log
            .lock()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event '{}' not logged", event))
    }
}

#[async_trait]
impl Capability for SlowTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("slow", 0, "Sleeps, then returns the step id")
    }

    async fn invoke(&self, _params: Value, ctx: &InvocationContext) -> Result<Value, FlowError> {
        self.log.lock().push(format!("start:{}", ctx.step_id));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().push(format!("end:{}", ctx.step_id));
        Ok(json!({ "step": ctx.step_id }))
    }
}

/// Engine config that writes nothing to disk
pub fn in_memory_config() -> EngineConfig {
    EngineConfig::default()
        .with_persistence(false, false)
        .with_artifacts(false)
}

/// Built-in tools plus the given extras
pub fn registry_with(extra: Vec<Arc<dyn Capability>>) -> ToolRegistry {
    let mut registry = ToolRegistry::discover().expect("built-in tools register");
    for capability in extra {
        registry.register(capability).expect("test tool registers");
    }
    registry
}

/// Router with one offline backend per tier, never exploring
pub fn offline_router() -> SmartRouter {
    let router = SmartRouter::new(RouterConfig::default()).with_random(Arc::new(SequenceRandom::never()));
    router
        .register(Arc::new(EchoBackend::new("echo-small", 1)))
        .expect("register tier 1");
    router
        .register(Arc::new(EchoBackend::new("echo-large", 2)))
        .expect("register tier 2");
    router
}

pub fn runner_with(extra: Vec<Arc<dyn Capability>>) -> WorkflowRunner {
    WorkflowRunner::new(
        in_memory_config(),
        Arc::new(registry_with(extra)),
        Arc::new(offline_router()),
    )
}
