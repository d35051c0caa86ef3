//! DAG Executor - the run scheduler
//!
//! ```text
//!            ┌────────────── scheduler task (sole owner) ───────────────┐
//!            │ completed set · terminal states · ready queue · builder  │
//!            └──────┬───────────────────────────────────────▲───────────┘
//!   ready_nodes()   │ dispatch ≤ concurrency                │ join_next()
//!                   ▼                                       │
//!            ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!            │ step task   │ │ step task   │ │ step task   │  attempt → retry
//!            └─────────────┘ └─────────────┘ └─────────────┘  backoff → attempt
//! ```
//!
//! All scheduling state lives in the loop of [`DagExecutor::execute`]; step
//! tasks own their [`StepInstance`] until they hand it back on completion.
//! A dependent is only dispatched after the join of its last dependency, so
//! it can never start before its inputs are terminal.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::graph::Dag;
use crate::clock::{Clock, SystemClock};
use crate::config::RetryPolicy;
use crate::error::FlowError;
use crate::step::{StepEvent, StepInstance, StepResult, StepState, Transition};
use crate::workflow::record::{RunRecord, RunRecordBuilder, RunStatus};
use crate::workflow::{FailurePolicy, StepDefinition};

/// What the scheduler needs from the layer that actually runs steps
#[async_trait]
pub trait StepRunner: Send + Sync + 'static {
    /// Condition check for a step about to be dispatched; `false` skips it
    fn should_run(&self, step: &StepDefinition) -> bool;

    /// Run one attempt; failures are reported in the result, never raised
    async fn attempt(&self, step: Arc<StepDefinition>, attempt: u32) -> StepResult;

    fn retry_policy(&self, step: &StepDefinition) -> RetryPolicy;

    /// Publish a succeeded step's output before dependents are scheduled
    fn record_output(&self, step: &StepDefinition, output: &Value);

    /// Observe a transition
    fn on_transition(&self, _step_id: &str, _transition: &Transition) {}
}

/// Bounded-concurrency scheduler over a [`Dag`]
#[derive(Clone)]
pub struct DagExecutor {
    concurrency: usize,
    policy: FailurePolicy,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DagExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagExecutor")
            .field("concurrency", &self.concurrency)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Scheduler-owned bookkeeping for one run
struct Schedule {
    completed: HashSet<String>,
    terminal: HashMap<String, StepState>,
    discovered: HashSet<String>,
    queue: VecDeque<String>,
    halted: bool,
    cancelled: bool,
}

impl DagExecutor {
    pub fn new(concurrency: usize, policy: FailurePolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drive every node of `dag` to a terminal state (or leave it unscheduled)
    pub async fn execute(
        &self,
        dag: &Dag,
        runner: Arc<dyn StepRunner>,
        mut builder: RunRecordBuilder,
    ) -> RunRecord {
        let mut schedule = Schedule {
            completed: HashSet::new(),
            terminal: HashMap::new(),
            discovered: HashSet::new(),
            queue: VecDeque::new(),
            halted: false,
            cancelled: false,
        };
        let mut in_flight: JoinSet<(String, Option<StepInstance>)> = JoinSet::new();

        info!(
            run_id = %builder.run_id(),
            steps = dag.len(),
            concurrency = self.concurrency,
            policy = %self.policy,
            "Starting run"
        );

        loop {
            // Checked separately from `halted`: a fail-fast halt caused by the
            // cancellation itself still ends the run as cancelled
            if !schedule.cancelled && self.cancel.is_cancelled() {
                warn!(run_id = %builder.run_id(), "Run cancelled, no further dispatch");
                schedule.halted = true;
                schedule.cancelled = true;
            }

            if !schedule.halted {
                loop {
                    let mut progressed = self.discover(dag, runner.as_ref(), &mut schedule, &mut builder);
                    while in_flight.len() < self.concurrency {
                        let Some(id) = schedule.queue.pop_front() else { break };
                        let Some(step) = dag.node(&id).cloned() else { continue };
                        progressed |= self.dispatch(step, &runner, &mut in_flight, &mut schedule, &mut builder);
                    }
                    if !progressed || schedule.halted {
                        break;
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            match in_flight.join_next().await {
                Some(Ok((_, Some(instance)))) => {
                    let capability = dag.node(instance.step_id()).map(|s| s.capability.clone()).unwrap_or_default();
                    self.finish(instance, &capability, &mut schedule, &mut builder);
                }
                Some(Ok((id, None))) => {
                    error!(step_id = %id, "Step task panicked");
                    let capability = dag.node(&id).map(|s| s.capability.clone()).unwrap_or_default();
                    let instance = self.panicked_instance(&id, &capability, runner.as_ref());
                    self.finish(instance, &capability, &mut schedule, &mut builder);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Step task failed to join");
                }
                None => break,
            }
        }

        let unscheduled: Vec<String> = dag
            .ids()
            .iter()
            .filter(|id| !schedule.terminal.contains_key(*id))
            .cloned()
            .collect();

        let status = if schedule.cancelled {
            RunStatus::Cancelled
        } else if !unscheduled.is_empty() || schedule.terminal.values().any(|s| *s == StepState::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        info!(
            run_id = %builder.run_id(),
            status = %status,
            unscheduled = unscheduled.len(),
            "Run finished"
        );
        builder.finish(status, unscheduled, self.clock.now())
    }

    /// Queue newly ready nodes; returns true if any node was skipped outright
    fn discover(
        &self,
        dag: &Dag,
        runner: &dyn StepRunner,
        schedule: &mut Schedule,
        builder: &mut RunRecordBuilder,
    ) -> bool {
        let mut skipped_any = false;
        loop {
            let ready: Vec<String> = dag
                .ready_nodes(&schedule.completed)
                .into_iter()
                .filter(|id| !schedule.discovered.contains(id))
                .collect();
            if ready.is_empty() {
                return skipped_any;
            }

            let mut skipped_now = false;
            for id in ready {
                schedule.discovered.insert(id.clone());
                let Some(step) = dag.node(&id) else { continue };

                match self.skip_reason(dag, step, &schedule.terminal) {
                    Some(reason) => {
                        let retry = runner.retry_policy(step);
                        let mut instance = StepInstance::new(&id, retry.max_retries, self.clock.now());
                        apply(&mut instance, StepEvent::Skip(reason), self.clock.as_ref(), runner);
                        self.finish(instance, &step.capability, schedule, builder);
                        skipped_now = true;
                    }
                    None => schedule.queue.push_back(id),
                }
            }

            if !skipped_now {
                return skipped_any;
            }
            skipped_any = true;
        }
    }

    /// Why a ready node should not run, given its dependencies' terminal states
    fn skip_reason(
        &self,
        dag: &Dag,
        step: &StepDefinition,
        terminal: &HashMap<String, StepState>,
    ) -> Option<String> {
        // Conditions read outputs too: a failed or skipped source would be seen as null
        for dep in step.binding_steps().into_iter().chain(step.condition_steps()) {
            match terminal.get(&dep) {
                Some(StepState::Succeeded) => {}
                Some(state) => return Some(format!("input from '{}' is unavailable ({})", dep, state)),
                None => return Some(format!("input from '{}' is unavailable", dep)),
            }
        }

        let mut deps = dag.dependencies(&step.id).peekable();
        if deps.peek().is_some() && deps.all(|d| terminal.get(d) == Some(&StepState::Skipped)) {
            return Some("no satisfied dependency path".to_string());
        }
        None
    }

    /// Create an instance and start it, or skip it on a false condition.
    /// Returns true if the step was skipped.
    fn dispatch(
        &self,
        step: Arc<StepDefinition>,
        runner: &Arc<dyn StepRunner>,
        in_flight: &mut JoinSet<(String, Option<StepInstance>)>,
        schedule: &mut Schedule,
        builder: &mut RunRecordBuilder,
    ) -> bool {
        let retry = runner.retry_policy(&step);
        let mut instance = StepInstance::new(&step.id, retry.max_retries, self.clock.now());
        apply(&mut instance, StepEvent::Schedule, self.clock.as_ref(), runner.as_ref());

        if !runner.should_run(&step) {
            apply(
                &mut instance,
                StepEvent::Skip("condition evaluated false".to_string()),
                self.clock.as_ref(),
                runner.as_ref(),
            );
            self.finish(instance, &step.capability, schedule, builder);
            return true;
        }

        debug!(step_id = %step.id, capability = %step.capability, "Dispatching step");
        let id = step.id.clone();
        let runner = runner.clone();
        let clock = self.clock.clone();
        let cancel = self.cancel.clone();
        in_flight.spawn(async move {
            let drive = drive_step(step, instance, retry, runner, clock, cancel);
            let outcome = AssertUnwindSafe(drive).catch_unwind().await.ok();
            (id, outcome)
        });
        false
    }

    fn finish(
        &self,
        instance: StepInstance,
        capability: &str,
        schedule: &mut Schedule,
        builder: &mut RunRecordBuilder,
    ) {
        let id = instance.step_id().to_string();
        let state = instance.state();

        match state {
            StepState::Failed => {
                let error = instance.result().and_then(|r| r.error.as_ref()).map(|e| e.to_string());
                warn!(step_id = %id, attempts = instance.attempts(), error = ?error, "Step failed");
                if self.policy == FailurePolicy::FailFast && !schedule.halted {
                    info!(step_id = %id, "Fail-fast: halting dispatch");
                    schedule.halted = true;
                }
            }
            StepState::Skipped => {
                debug!(step_id = %id, reason = ?instance.skip_reason(), "Step skipped");
            }
            _ => {
                info!(step_id = %id, attempts = instance.attempts(), backend = ?instance.backend(), "Step succeeded");
            }
        }

        builder.push_step(&instance, capability);
        schedule.terminal.insert(id.clone(), state);
        schedule.completed.insert(id);
    }

    fn panicked_instance(&self, id: &str, capability: &str, runner: &dyn StepRunner) -> StepInstance {
        let clock = self.clock.as_ref();
        let mut instance = StepInstance::new(id, 0, clock.now());
        let err = FlowError::capability(capability, "step task panicked");
        apply(&mut instance, StepEvent::Schedule, clock, runner);
        apply(&mut instance, StepEvent::Start, clock, runner);
        apply(
            &mut instance,
            StepEvent::Fail(StepResult::failure(&err, std::time::Duration::ZERO, None)),
            clock,
            runner,
        );
        instance
    }
}

/// Advance an instance and notify the runner; illegal events are logged
fn apply(instance: &mut StepInstance, event: StepEvent, clock: &dyn Clock, runner: &dyn StepRunner) -> bool {
    match instance.advance(event, clock.now()) {
        Ok(_) => {
            if let Some(transition) = instance.transitions().last() {
                runner.on_transition(instance.step_id(), transition);
            }
            true
        }
        Err(e) => {
            error!(step_id = %instance.step_id(), error = %e, "Rejected step transition");
            false
        }
    }
}

/// Attempt loop for one step: start, attempt, then succeed, fail or retry
async fn drive_step(
    step: Arc<StepDefinition>,
    mut instance: StepInstance,
    retry: RetryPolicy,
    runner: Arc<dyn StepRunner>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> StepInstance {
    loop {
        if !apply(&mut instance, StepEvent::Start, clock.as_ref(), runner.as_ref()) {
            return instance;
        }

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => StepResult::failure(
                &FlowError::cancelled("workflow cancelled"),
                started.elapsed(),
                None,
            ),
            result = runner.attempt(step.clone(), instance.attempts()) => result,
        };

        if result.success {
            if let Some(output) = &result.output {
                runner.record_output(&step, output);
            }
            apply(&mut instance, StepEvent::Succeed(result), clock.as_ref(), runner.as_ref());
            return instance;
        }

        apply(&mut instance, StepEvent::Fail(result), clock.as_ref(), runner.as_ref());
        if !instance.can_retry() {
            return instance;
        }

        let delay = retry.delay_for_attempt(instance.retries_used());
        warn!(
            step_id = %step.id,
            attempt = instance.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Retrying step"
        );

        let interrupted = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        };
        if interrupted {
            apply(
                &mut instance,
                StepEvent::GiveUp("workflow cancelled".to_string()),
                clock.as_ref(),
                runner.as_ref(),
            );
            return instance;
        }

        if !apply(&mut instance, StepEvent::Retry, clock.as_ref(), runner.as_ref()) {
            return instance;
        }
    }
}
