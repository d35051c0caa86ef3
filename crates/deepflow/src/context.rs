//! Per-run execution context
//!
//! Holds the run inputs and the output of every succeeded step. Cloning is
//! cheap (shared `Arc`). Only the executor records outputs; everything else
//! reads.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ContextInner {
    inputs: Value,
    outputs: RwLock<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    pub fn new(inputs: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                inputs: Value::Object(inputs),
                outputs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Run inputs as a JSON object
    pub fn inputs(&self) -> &Value {
        &self.inner.inputs
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inner.inputs.get(name)
    }

    /// Output of a succeeded step
    pub fn output(&self, step_id: &str) -> Option<Value> {
        self.inner.outputs.read().get(step_id).cloned()
    }

    pub fn has_output(&self, step_id: &str) -> bool {
        self.inner.outputs.read().contains_key(step_id)
    }

    /// Copy of all recorded outputs
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner
            .outputs
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn record_output(&self, step_id: &str, output: Value) {
        self.inner.outputs.write().insert(step_id.to_string(), output);
    }
}

/// Walk a dotted path through objects (by key) and arrays (by index)
pub fn lookup_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for part in path {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
