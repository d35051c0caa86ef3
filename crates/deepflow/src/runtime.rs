//! Executor - runs step attempts for the DAG scheduler
//!
//! ```text
//!  attempt(step)
//!     │ resolve bindings ── ExecutionContext
//!     │ check params ────── ToolDescriptor.parameters
//!     ├─ tier 0 ──────────▶ capability.invoke()               (timeout)
//!     └─ tier N ──▶ router.route_excluding() ──▶ invoke()     (timeout)
//!                       ▲        │ report(outcome)
//!                       └────────┘ permanent error: next backend
//!     │ check result ────── ToolDescriptor.result
//!     ▼
//!  StepResult
//! ```
//!
//! The per-step timeout bounds the whole attempt, fallbacks included. When
//! it fires the in-flight backend future is dropped.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, RetryPolicy};
use crate::context::ExecutionContext;
use crate::contracts::{StepInput, StepOutput, ToolRequest, ToolResponse};
use crate::dag::{Dag, DagExecutor, StepRunner};
use crate::error::{ErrorClass, FlowError};
use crate::hooks::{self, DynHook, TransitionEvent};
use crate::router::{CallOutcome, SmartRouter};
use crate::step::{StepResult, Transition};
use crate::tools::{DynCapability, InvocationContext, ToolDescriptor, ToolRegistry};
use crate::workflow::record::{RunRecord, RunRecordBuilder};
use crate::workflow::StepDefinition;

/// Runtime for one run: context, capabilities, routing and hooks
pub struct Executor {
    run_id: Uuid,
    workflow: String,
    registry: Arc<ToolRegistry>,
    router: Arc<SmartRouter>,
    context: ExecutionContext,
    hooks: Vec<DynHook>,
    step_timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("run_id", &self.run_id)
            .field("workflow", &self.workflow)
            .field("hooks", &self.hooks.iter().map(|h| h.name().to_string()).collect::<Vec<_>>())
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, router: Arc<SmartRouter>, context: ExecutionContext) -> Self {
        let defaults = EngineConfig::default();
        Self {
            run_id: Uuid::new_v4(),
            workflow: String::new(),
            registry,
            router,
            context,
            hooks: Vec::new(),
            step_timeout: defaults.step_timeout,
            retry: defaults.retry,
        }
    }

    /// Identify the run in hook events
    pub fn with_run(mut self, run_id: Uuid, workflow: impl Into<String>) -> Self {
        self.run_id = run_id;
        self.workflow = workflow.into();
        self
    }

    pub fn with_hook(mut self, hook: DynHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_hooks(mut self, hooks: impl IntoIterator<Item = DynHook>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    /// Default per-attempt timeout for steps without their own
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Default retry policy for steps without their own
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Run every step of `dag` through `scheduler`
    pub async fn execute(self, dag: &Dag, scheduler: &DagExecutor, builder: RunRecordBuilder) -> RunRecord {
        scheduler.execute(dag, Arc::new(self), builder).await
    }

    /// Resolve bindings into the input envelope for one attempt
    fn resolve(
        &self,
        step: &StepDefinition,
        attempt: u32,
    ) -> Result<(DynCapability, ToolDescriptor, StepInput), FlowError> {
        let params = step.inputs.resolve(&self.context)?;
        let capability = self.registry.get(&step.capability)?;
        let descriptor = self.registry.descriptor(&step.capability)?.clone();
        descriptor.parameters.validate(&format!("$.{}.inputs", step.id), &params)?;
        let input = StepInput::new(&step.id, attempt, ToolRequest::new(&step.capability, params));
        Ok((capability, descriptor, input))
    }

    async fn invoke_local(
        &self,
        input: &StepInput,
        capability: DynCapability,
        deadline: tokio::time::Instant,
        started: Instant,
    ) -> Result<Value, FlowError> {
        let ctx = InvocationContext::new(&input.step_id, input.attempt);
        match tokio::time::timeout_at(deadline, capability.invoke(input.request.params.clone(), &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::timeout(&input.step_id, started.elapsed())),
        }
    }

    /// Routed invocation with in-attempt fallback on permanent backend errors
    async fn invoke_routed(
        &self,
        input: &StepInput,
        capability: DynCapability,
        tier: u8,
        deadline: tokio::time::Instant,
        started: Instant,
    ) -> (Result<Value, FlowError>, Option<String>, Vec<String>) {
        let (step_id, attempt) = (input.step_id.as_str(), input.attempt);
        let mut tried: Vec<String> = Vec::new();
        loop {
            let backend_id = match self.router.route_excluding(tier, &input.request.capability, &tried) {
                Ok(id) => id,
                Err(e) => return (Err(e), tried.last().cloned(), tried),
            };
            let Some(backend) = self.router.backend(&backend_id) else {
                tried.push(backend_id);
                continue;
            };

            debug!(step_id, backend = %backend_id, attempt, "Invoking routed capability");
            let ctx = InvocationContext::new(step_id, attempt).with_backend(backend);
            let call_started = Instant::now();
            let invocation = capability.invoke(input.request.params.clone(), &ctx);
            let result = match tokio::time::timeout_at(deadline, invocation).await {
                Ok(result) => result,
                Err(_) => Err(FlowError::timeout(step_id, started.elapsed())),
            };
            self.report(&backend_id, &result, call_started.elapsed());

            match result {
                Err(e) if e.class() == ErrorClass::PermanentBackend => {
                    warn!(step_id, backend = %backend_id, error = %e, "Permanent backend error, falling back");
                    tried.push(backend_id);
                }
                other => return (other, Some(backend_id), tried),
            }
        }
    }

    /// Feed backend-attributable outcomes to the router
    fn report(&self, backend_id: &str, result: &Result<Value, FlowError>, latency: Duration) {
        let outcome = match result {
            Ok(_) => CallOutcome::success(latency),
            Err(e) => match e.class() {
                class @ (ErrorClass::TransientBackend | ErrorClass::PermanentBackend | ErrorClass::Timeout) => {
                    CallOutcome::failure(class, latency)
                }
                _ => return,
            },
        };
        self.router.report(backend_id, outcome);
    }
}

#[async_trait]
impl StepRunner for Executor {
    fn should_run(&self, step: &StepDefinition) -> bool {
        match &step.condition {
            Some(condition) => condition.evaluate(&self.context),
            None => true,
        }
    }

    async fn attempt(&self, step: Arc<StepDefinition>, attempt: u32) -> StepResult {
        let started = Instant::now();
        let (capability, descriptor, input) = match self.resolve(&step, attempt) {
            Ok(resolved) => resolved,
            Err(e) => return StepResult::failure(&e, started.elapsed(), None),
        };

        let timeout = step.timeout.unwrap_or(self.step_timeout);
        let deadline = tokio::time::Instant::now() + timeout;
        let tier = step.tier.max(descriptor.tier);

        let (result, backend_id, tried) = if tier == 0 {
            let result = self.invoke_local(&input, capability, deadline, started).await;
            (result, Some(format!("tool:{}", descriptor.name)), Vec::new())
        } else {
            self.invoke_routed(&input, capability, tier, deadline, started).await
        };

        let result = result.and_then(|output| {
            descriptor
                .result
                .validate(&format!("$.{}.output", step.id), &output)
                .map(|_| output)
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let Some(backend_id) = backend_id else {
            return match result {
                Ok(output) => StepResult::success(output, started.elapsed(), None),
                Err(e) => StepResult::failure(&e, started.elapsed(), None),
            };
        };

        let response = match result {
            Ok(output) => ToolResponse::ok(&descriptor.name, backend_id, output, elapsed_ms),
            Err(e) => ToolResponse::failed(&descriptor.name, backend_id, &e, elapsed_ms),
        };
        let response = if tried.is_empty() {
            response
        } else {
            response.with_metadata("fallback_from", serde_json::json!(tried))
        };
        StepResult::from(StepOutput::new(input, response))
    }

    fn retry_policy(&self, step: &StepDefinition) -> RetryPolicy {
        step.retry.clone().unwrap_or_else(|| self.retry.clone())
    }

    fn record_output(&self, step: &StepDefinition, output: &Value) {
        self.context.record_output(&step.id, output.clone());
    }

    fn on_transition(&self, step_id: &str, transition: &Transition) {
        if self.hooks.is_empty() {
            return;
        }
        let event = TransitionEvent {
            run_id: self.run_id,
            workflow: self.workflow.clone(),
            step_id: step_id.to_string(),
            transition: transition.clone(),
        };
        hooks::dispatch(&self.hooks, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{PropertySchema, Schema};
    use crate::llm::{ModelBackend, ModelDescriptor, ModelRequest, ModelResponse};
    use crate::router::{RouterConfig, SequenceRandom};
    use crate::tools::{AgentCapability, Capability};
    use crate::workflow::Binding;
    use serde_json::{json, Map};

    /// Backend failing with a fixed error, or succeeding after a delay
    struct TestBackend {
        descriptor: ModelDescriptor,
        error: Option<ErrorClass>,
        delay: Duration,
    }

    #[async_trait]
    impl ModelBackend for TestBackend {
        fn descriptor(&self) -> &ModelDescriptor {
            &self.descriptor
        }

        async fn complete(&self, _request: &ModelRequest) -> Result<ModelResponse, FlowError> {
            tokio::time::sleep(self.delay).await;
            let id = &self.descriptor.id;
            match self.error {
                Some(ErrorClass::PermanentBackend) => Err(FlowError::permanent(id, "401 unauthorized")),
                Some(_) => Err(FlowError::transient(id, "503 overloaded")),
                None => Ok(ModelResponse::new(format!("from {}", id))),
            }
        }
    }

    fn backend(id: &str, tier: u8, error: Option<ErrorClass>, delay: Duration) -> Arc<TestBackend> {
        Arc::new(TestBackend {
            descriptor: ModelDescriptor::new(id, tier),
            error,
            delay,
        })
    }

    fn router() -> Arc<SmartRouter> {
        Arc::new(SmartRouter::new(RouterConfig::default()).with_random(Arc::new(SequenceRandom::never())))
    }

    fn executor(router: Arc<SmartRouter>) -> Executor {
        let mut inputs = Map::new();
        inputs.insert("topic".into(), json!("graphs"));
        Executor::new(
            Arc::new(ToolRegistry::discover().unwrap()),
            router,
            ExecutionContext::new(inputs),
        )
    }

    fn step(id: &str, capability: &str, inputs: Value) -> Arc<StepDefinition> {
        Arc::new(StepDefinition::new(id, capability).with_inputs(Binding::parse(&inputs, "$").unwrap()))
    }

    #[tokio::test]
    async fn test_local_tool_attempt() {
        let exec = executor(router());
        let result = exec
            .attempt(step("e", "echo", json!({"t": "$inputs.topic"})), 1)
            .await;

        assert!(result.success);
        assert_eq!(result.output, Some(json!({"t": "graphs"})));
        assert_eq!(result.backend_id.as_deref(), Some("tool:echo"));
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn test_resolve_builds_input_envelope() {
        let exec = executor(router());
        let (_, descriptor, input) = exec
            .resolve(&step("e", "echo", json!({"t": "$inputs.topic", "n": 2})), 3)
            .unwrap();

        assert_eq!(descriptor.name, "echo");
        assert_eq!(input.step_id, "e");
        assert_eq!(input.attempt, 3);
        assert_eq!(input.request, ToolRequest::new("echo", json!({"t": "graphs", "n": 2})));
    }

    #[tokio::test]
    async fn test_params_checked_against_descriptor() {
        let exec = executor(router());
        let result = exec.attempt(step("w", "write_file", json!({"filename": "x"})), 1).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.class, ErrorClass::Schema);
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_unresolved_reference_fails_attempt() {
        let exec = executor(router());
        let result = exec.attempt(step("e", "echo", json!({"x": "$missing.output"})), 1).await;
        assert_eq!(result.error.unwrap().class, ErrorClass::Schema);
    }

    #[tokio::test]
    async fn test_permanent_error_falls_back_within_attempt() {
        let router = router();
        router
            .register(backend("denied", 1, Some(ErrorClass::PermanentBackend), Duration::ZERO))
            .unwrap();
        router.register(backend("fine", 1, None, Duration::ZERO)).unwrap();
        let exec = executor(router.clone());

        let result = exec.attempt(step("p", "plan", json!({"topic": "x"})), 1).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.backend_id.as_deref(), Some("fine"));
        assert_eq!(result.metadata["fallback_from"], json!(["denied"]));
        assert!(router.stats("denied").unwrap().cooldown_until.is_some());
        assert_eq!(router.stats("fine").unwrap().successes, 1);

        // The fallback survives into the serialized result
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["metadata"]["fallback_from"][0], "denied");
    }

    #[tokio::test]
    async fn test_transient_error_is_retryable_and_reported() {
        let router = router();
        router
            .register(backend("flaky", 1, Some(ErrorClass::TransientBackend), Duration::ZERO))
            .unwrap();
        let exec = executor(router.clone());

        let result = exec.attempt(step("p", "plan", json!({"topic": "x"})), 1).await;
        let error = result.error.unwrap();
        assert_eq!(error.class, ErrorClass::TransientBackend);
        assert!(error.retryable);
        assert_eq!(router.stats("flaky").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_no_backend_is_fatal() {
        let exec = executor(router());
        let result = exec.attempt(step("r", "review", json!({"content": "draft"})), 1).await;
        let error = result.error.unwrap();
        assert_eq!(error.class, ErrorClass::NoBackendAvailable);
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_timeout_drops_backend_call() {
        let router = router();
        router.register(backend("slow", 1, None, Duration::from_secs(30))).unwrap();
        let exec = executor(router.clone());
        let slow_step = Arc::new(
            StepDefinition::new("s", "summarize")
                .with_inputs(Binding::parse(&json!({"text": "t"}), "$").unwrap())
                .with_timeout(Duration::from_millis(30)),
        );

        let result = exec.attempt(slow_step, 1).await;
        let error = result.error.unwrap();
        assert_eq!(error.class, ErrorClass::Timeout);
        assert!(error.retryable);
        assert_eq!(router.stats("slow").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_result_schema_enforced() {
        struct Liar;

        #[async_trait]
        impl Capability for Liar {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("liar", 0, "returns the wrong shape")
                    .with_result(Schema::any().required_property("n", PropertySchema::integer()))
            }

            async fn invoke(&self, _params: Value, _ctx: &InvocationContext) -> Result<Value, FlowError> {
                Ok(json!({"n": "seven"}))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Liar)).unwrap();
        registry.register(Arc::new(AgentCapability::summarize())).unwrap();
        let exec = Executor::new(Arc::new(registry), router(), ExecutionContext::default());

        let result = exec.attempt(step("l", "liar", json!({})), 1).await;
        assert_eq!(result.error.unwrap().class, ErrorClass::Schema);
    }

    #[test]
    fn test_condition_and_retry_defaults() {
        let exec = executor(router()).with_retry_policy(RetryPolicy::new(2));
        let plain = StepDefinition::new("a", "echo");
        assert!(exec.should_run(&plain));
        assert_eq!(exec.retry_policy(&plain).max_retries, 2);

        let own = plain.clone().with_retry(RetryPolicy::new(5));
        assert_eq!(exec.retry_policy(&own).max_retries, 5);

        let gated = plain.with_condition(crate::workflow::Condition::parse("!$inputs.topic").unwrap());
        assert!(!exec.should_run(&gated));
    }
}
