//! Workflow loader
//!
//! Turns YAML text into a validated [`WorkflowDefinition`]:
//!
//! 1. YAML parse into [`WorkflowDocument`] (`Schema` error on bad syntax or unknown keys)
//! 2. Structural checks: non-empty steps, identifier syntax, reserved ids
//! 3. Capability resolution against the registry (`NotFound`)
//! 4. Binding and condition parsing, literal params checked against the
//!    capability's parameter schema (`Schema`)
//! 5. DAG build (`Validation`: cycles, unknown or non-upstream references)

use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::binding::{Binding, INPUTS};
use super::condition::Condition;
use super::definition::{FailurePolicy, StepDefinition, WorkflowDefinition, WorkflowDocument};
use crate::config::{EngineConfig, RetryPolicy};
use crate::dag::Dag;
use crate::error::FlowError;
use crate::tools::ToolRegistry;

fn identifier() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("identifier pattern is a valid regex"))
}

/// Loads and validates workflow files
#[derive(Debug, Clone)]
pub struct WorkflowLoader {
    registry: Arc<ToolRegistry>,
    concurrency: usize,
    failure_policy: FailurePolicy,
    retry: RetryPolicy,
}

impl WorkflowLoader {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            concurrency: 1,
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Take defaults for unset workflow options from an engine config
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.concurrency = config.concurrency.max(1);
        self.failure_policy = config.failure_policy;
        self.retry = config.retry.clone();
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Parse and validate workflow YAML
    pub fn load(&self, source: &str) -> Result<WorkflowDefinition, FlowError> {
        let doc: WorkflowDocument =
            serde_yaml::from_str(source).map_err(|e| FlowError::schema("$", e.to_string()))?;
        self.from_document(doc)
    }

    /// Read and load a workflow file
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<WorkflowDefinition, FlowError> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        let definition = self.load(&source).map_err(|e| match e {
            FlowError::Schema { path: at, message } => {
                FlowError::schema(format!("{}:{}", path.display(), at), message)
            }
            other => other,
        })?;
        info!(path = %path.display(), workflow = %definition.name, steps = definition.dag.len(), "Loaded workflow");
        Ok(definition)
    }

    /// Workflow files (`.yaml`/`.yml`) beneath a directory, sorted
    pub fn discover(dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(dir.as_ref())
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches!(p.extension().and_then(|x| x.to_str()), Some("yaml" | "yml")))
            .collect();
        found.sort();
        found
    }

    /// Validate a parsed document
    pub fn from_document(&self, doc: WorkflowDocument) -> Result<WorkflowDefinition, FlowError> {
        if doc.name.trim().is_empty() {
            return Err(FlowError::schema("$.name", "workflow name must not be empty"));
        }
        if doc.steps.is_empty() {
            return Err(FlowError::schema("$.steps", "a workflow needs at least one step"));
        }
        if doc.concurrency == Some(0) {
            return Err(FlowError::schema("$.concurrency", "concurrency must be at least 1"));
        }

        let mut steps = Vec::with_capacity(doc.steps.len());
        for (i, raw) in doc.steps.into_iter().enumerate() {
            let at = format!("$.steps[{}]", i);
            if !identifier().is_match(&raw.id) {
                return Err(FlowError::schema(
                    format!("{}.id", at),
                    format!("'{}' is not a valid step id", raw.id),
                ));
            }
            if raw.id == INPUTS {
                return Err(FlowError::schema(format!("{}.id", at), "'inputs' is reserved"));
            }

            let descriptor = self.registry.descriptor(&raw.capability)?;

            let inputs_value = match raw.inputs {
                Value::Null => Value::Object(Default::default()),
                other => other,
            };
            let inputs_path = format!("$.{}.inputs", raw.id);
            let inputs = Binding::parse(&inputs_value, &inputs_path)?;
            check_literal_params(&inputs, &descriptor.parameters, &inputs_path)?;

            let condition = raw
                .condition
                .as_deref()
                .map(Condition::parse)
                .transpose()
                .map_err(|e| match e {
                    FlowError::Schema { message, .. } => FlowError::schema(format!("$.{}.condition", raw.id), message),
                    other => other,
                })?;

            let mut step = StepDefinition::new(raw.id, raw.capability)
                .with_tier(descriptor.tier)
                .with_inputs(inputs)
                .depends_on(raw.depends_on);
            if let Some(c) = condition {
                step = step.with_condition(c);
            }
            if let Some(retry) = raw.retry {
                step = step.with_retry(retry.to_policy(&self.retry));
            }
            if let Some(timeout) = raw.timeout {
                if timeout.is_zero() {
                    return Err(FlowError::schema(format!("$.{}.timeout", step.id), "timeout must be greater than zero"));
                }
                step = step.with_timeout(timeout);
            }
            debug!(step_id = %step.id, capability = %step.capability, tier = step.tier, "Parsed step");
            steps.push(step);
        }

        let dag = Dag::from_steps(steps)?;
        let mut definition = WorkflowDefinition::new(doc.name, dag)
            .with_concurrency(doc.concurrency.unwrap_or(self.concurrency))
            .with_failure_policy(doc.on_failure.unwrap_or(self.failure_policy));
        definition.description = doc.description;
        Ok(definition)
    }
}

/// Check what is knowable before the run: required keys are present, and
/// every reference-free value satisfies its property schema.
fn check_literal_params(inputs: &Binding, schema: &crate::contracts::Schema, path: &str) -> Result<(), FlowError> {
    let Binding::Object(fields) = inputs else {
        return match inputs.literal_value() {
            Some(value) => schema.validate(path, &value),
            None => Ok(()),
        };
    };

    schema.check_required(path, fields.keys().map(String::as_str))?;
    for (key, binding) in fields {
        match binding.literal_value() {
            Some(value) => schema.check_property(path, key, &value)?,
            None if !schema.additional_properties && !schema.properties.contains_key(key) => {
                return Err(FlowError::schema(format!("{}.{}", path, key), "unknown property"));
            }
            None => {}
        }
    }
    Ok(())
}
