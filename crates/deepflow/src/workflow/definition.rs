//! Workflow definitions
//!
//! Two layers: the serde `*Document` structs mirror the YAML file, and the
//! typed [`WorkflowDefinition`] / [`StepDefinition`] model is what the loader
//! produces after validation. The typed model is immutable once built.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::binding::Binding;
use super::condition::Condition;
use crate::config::RetryPolicy;
use crate::dag::Dag;

/// What the scheduler does after a terminal step failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop dispatching, drain in-flight steps, return a partial record
    #[default]
    FailFast,
    /// Keep scheduling; dependents of failed steps are skipped when they need the output
    BestEffort,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailFast => f.write_str("fail-fast"),
            FailurePolicy::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// Raw workflow file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, alias = "failure_policy", skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailurePolicy>,
    pub steps: Vec<StepDocument>,
}

/// Raw step entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    pub id: String,
    pub capability: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDocument>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Raw retry block: `retry: { max: 2, backoff: 200ms }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryDocument {
    pub max: u32,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<Duration>,
}

impl RetryDocument {
    /// Merge onto a base policy
    pub fn to_policy(&self, base: &RetryPolicy) -> RetryPolicy {
        let mut policy = RetryPolicy::new(self.max);
        policy.backoff_base = self.backoff.unwrap_or(base.backoff_base);
        policy.backoff_max = self.max_backoff.unwrap_or(base.backoff_max);
        policy
    }
}

/// Validated step
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub id: String,
    /// Tool name or agent role
    pub capability: String,
    /// Tier of the capability (0 = local tool)
    pub tier: u8,
    pub inputs: Binding,
    /// Explicit `depends_on` edges
    pub depends_on: Vec<String>,
    pub condition: Option<Condition>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            tier: 0,
            inputs: Binding::default(),
            depends_on: Vec::new(),
            condition: None,
            retry: None,
            timeout: None,
        }
    }

    pub fn with_tier(mut self, tier: u8) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_inputs(mut self, inputs: Binding) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Steps whose output the inputs consume
    pub fn binding_steps(&self) -> BTreeSet<String> {
        self.inputs.referenced_steps()
    }

    /// Steps the condition reads
    pub fn condition_steps(&self) -> BTreeSet<String> {
        self.condition
            .as_ref()
            .and_then(|c| c.reference().step().map(String::from))
            .into_iter()
            .collect()
    }

    /// Explicit edges plus every step referenced by inputs or condition
    pub fn all_dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self.depends_on.iter().cloned().collect();
        deps.extend(self.binding_steps());
        deps.extend(self.condition_steps());
        deps
    }
}

/// Validated workflow
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub dag: Arc<Dag>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, dag: Dag) -> Self {
        Self {
            name: name.into(),
            description: None,
            concurrency: 1,
            failure_policy: FailurePolicy::default(),
            dag: Arc::new(dag),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn step(&self, id: &str) -> Option<&Arc<StepDefinition>> {
        self.dag.node(id)
    }

    /// Steps in declaration order
    pub fn steps(&self) -> impl Iterator<Item = &Arc<StepDefinition>> {
        self.dag.nodes()
    }
}
