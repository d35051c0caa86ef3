//! Run records
//!
//! A [`RunRecord`] is built incrementally through [`RunRecordBuilder`] while
//! the run progresses and frozen by [`RunRecordBuilder::finish`]. The record
//! has no public mutators; it is what gets persisted and returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::definition::FailurePolicy;
use crate::step::{StepInstance, StepResult, StepState, Transition};

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded or was skipped
    Succeeded,
    /// At least one step failed, or steps were left unscheduled
    Failed,
    /// The run was cancelled
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => f.write_str("succeeded"),
            RunStatus::Failed => f.write_str("failed"),
            RunStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Per-step entry of a run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub capability: String,
    pub state: StepState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StepRecord {
    pub fn from_instance(instance: &StepInstance, capability: &str) -> Self {
        Self {
            step_id: instance.step_id().to_string(),
            capability: capability.to_string(),
            state: instance.state(),
            attempts: instance.attempts(),
            backend: instance.backend().map(String::from),
            started_at: instance.started_at(),
            ended_at: instance.ended_at(),
            transitions: instance.transitions().to_vec(),
            result: instance.result().cloned(),
            skip_reason: instance.skip_reason().map(String::from),
        }
    }

    /// Output of a succeeded step
    pub fn output(&self) -> Option<&Value> {
        match self.state {
            StepState::Succeeded => self.result.as_ref().and_then(|r| r.output.as_ref()),
            _ => None,
        }
    }
}

/// Immutable record of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    run_id: Uuid,
    workflow: String,
    status: RunStatus,
    failure_policy: FailurePolicy,
    concurrency: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(default)]
    inputs: Value,
    /// Steps in the order they reached a terminal state
    steps: Vec<StepRecord>,
    /// Steps that never got an instance
    unscheduled: Vec<String>,
}

impl RunRecord {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_id == id)
    }

    pub fn unscheduled(&self) -> &[String] {
        &self.unscheduled
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Total attempts across every step
    pub fn total_attempts(&self) -> u32 {
        self.steps.iter().map(|s| s.attempts).sum()
    }

    /// Ids of steps that ended in `state`
    pub fn steps_in(&self, state: StepState) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.step_id.as_str())
            .collect()
    }

    /// `(step_id, output)` for every succeeded step
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.steps
            .iter()
            .filter_map(|s| s.output().map(|o| (s.step_id.as_str(), o)))
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Accumulates step records while a run is in progress
#[derive(Debug, Clone)]
pub struct RunRecordBuilder {
    run_id: Uuid,
    workflow: String,
    failure_policy: FailurePolicy,
    concurrency: usize,
    started_at: DateTime<Utc>,
    inputs: Value,
    steps: Vec<StepRecord>,
}

impl RunRecordBuilder {
    pub fn new(run_id: Uuid, workflow: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            workflow: workflow.into(),
            failure_policy: FailurePolicy::default(),
            concurrency: 1,
            started_at,
            inputs: Value::Null,
            steps: Vec::new(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a terminal step instance
    pub fn push_step(&mut self, instance: &StepInstance, capability: &str) {
        self.steps.push(StepRecord::from_instance(instance, capability));
    }

    /// Freeze the record
    pub fn finish(
        self,
        status: RunStatus,
        unscheduled: Vec<String>,
        finished_at: DateTime<Utc>,
    ) -> RunRecord {
        RunRecord {
            run_id: self.run_id,
            workflow: self.workflow,
            status,
            failure_policy: self.failure_policy,
            concurrency: self.concurrency,
            started_at: self.started_at,
            finished_at,
            inputs: self.inputs,
            steps: self.steps,
            unscheduled,
        }
    }
}
