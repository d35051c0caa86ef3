//! Input bindings
//!
//! A binding is the parsed form of a step's `inputs` tree. Strings of the
//! form `$<step>.output[.field...]` or `$inputs.<name>[.field...]` are
//! references; `$$` escapes a literal leading dollar; everything else is a
//! literal. References may sit anywhere inside nested objects and arrays.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use crate::context::{lookup_path, ExecutionContext};
use crate::error::FlowError;

/// Reserved namespace for run inputs
pub const INPUTS: &str = "inputs";

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_-]*)((?:\.[A-Za-z0-9_-]+)*)$")
            .expect("reference pattern is a valid regex")
    })
}

/// A reference to a step output or run input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    StepOutput { step: String, path: Vec<String> },
    Input { name: String, path: Vec<String> },
}

impl Reference {
    /// Parse a `$...` string. Returns `Ok(None)` for strings that are not references.
    pub fn parse(text: &str) -> Result<Option<Reference>, FlowError> {
        if !text.starts_with('$') || text.starts_with("$$") {
            return Ok(None);
        }

        let caps = reference_pattern()
            .captures(text)
            .ok_or_else(|| FlowError::schema(text, "malformed reference"))?;
        let head = caps[1].to_string();
        let mut parts: Vec<String> = caps[2]
            .split('.')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if head == INPUTS {
            if parts.is_empty() {
                return Err(FlowError::schema(text, "expected $inputs.<name>"));
            }
            let name = parts.remove(0);
            return Ok(Some(Reference::Input { name, path: parts }));
        }

        if parts.first().map(String::as_str) != Some("output") {
            return Err(FlowError::schema(text, "expected $<step>.output[.field...]"));
        }
        parts.remove(0);
        Ok(Some(Reference::StepOutput {
            step: head,
            path: parts,
        }))
    }

    /// Step this reference depends on, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Reference::StepOutput { step, .. } => Some(step),
            Reference::Input { .. } => None,
        }
    }

    /// Resolve against the context; `None` if the output or path is missing
    pub fn lookup(&self, ctx: &ExecutionContext) -> Option<Value> {
        match self {
            Reference::StepOutput { step, path } => {
                let output = ctx.output(step)?;
                lookup_path(&output, path).cloned()
            }
            Reference::Input { name, path } => {
                let input = ctx.input(name)?;
                lookup_path(input, path).cloned()
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::StepOutput { step, path } => {
                write!(f, "${}.output", step)?;
                for p in path {
                    write!(f, ".{}", p)?;
                }
                Ok(())
            }
            Reference::Input { name, path } => {
                write!(f, "${}.{}", INPUTS, name)?;
                for p in path {
                    write!(f, ".{}", p)?;
                }
                Ok(())
            }
        }
    }
}

/// Parsed input tree
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(Value),
    Reference(Reference),
    Object(BTreeMap<String, Binding>),
    Array(Vec<Binding>),
}

impl Default for Binding {
    fn default() -> Self {
        Binding::Object(BTreeMap::new())
    }
}

impl Binding {
    /// Parse a raw inputs value; `path` locates errors
    pub fn parse(value: &Value, path: &str) -> Result<Binding, FlowError> {
        match value {
            Value::String(s) => match Reference::parse(s) {
                Ok(Some(reference)) => Ok(Binding::Reference(reference)),
                Ok(None) => {
                    let literal = s.strip_prefix('$').filter(|rest| rest.starts_with('$'));
                    Ok(Binding::Literal(Value::String(
                        literal.map(String::from).unwrap_or_else(|| s.clone()),
                    )))
                }
                Err(FlowError::Schema { message, .. }) => Err(FlowError::schema(path, message)),
                Err(other) => Err(other),
            },
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, v) in map {
                    fields.insert(key.clone(), Binding::parse(v, &format!("{}.{}", path, key))?);
                }
                Ok(Binding::Object(fields))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| Binding::parse(v, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Binding::Array),
            other => Ok(Binding::Literal(other.clone())),
        }
    }

    /// Every reference in the tree
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Binding::Literal(_) => {}
            Binding::Reference(r) => out.push(r),
            Binding::Object(fields) => fields.values().for_each(|b| b.collect_references(out)),
            Binding::Array(items) => items.iter().for_each(|b| b.collect_references(out)),
        }
    }

    /// Steps whose outputs this binding consumes
    pub fn referenced_steps(&self) -> BTreeSet<String> {
        self.references()
            .into_iter()
            .filter_map(|r| r.step().map(String::from))
            .collect()
    }

    /// Literal value of a reference-free subtree
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            Binding::Literal(v) => Some(v.clone()),
            Binding::Reference(_) => None,
            Binding::Object(fields) => {
                let mut map = Map::new();
                for (k, b) in fields {
                    map.insert(k.clone(), b.literal_value()?);
                }
                Some(Value::Object(map))
            }
            Binding::Array(items) => items
                .iter()
                .map(Binding::literal_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Substitute every reference with its current value
    pub fn resolve(&self, ctx: &ExecutionContext) -> Result<Value, FlowError> {
        match self {
            Binding::Literal(v) => Ok(v.clone()),
            Binding::Reference(r) => r
                .lookup(ctx)
                .ok_or_else(|| FlowError::schema(r.to_string(), "reference did not resolve")),
            Binding::Object(fields) => {
                let mut map = Map::new();
                for (k, b) in fields {
                    map.insert(k.clone(), b.resolve(ctx)?);
                }
                Ok(Value::Object(map))
            }
            Binding::Array(items) => items
                .iter()
                .map(|b| b.resolve(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_references() {
        assert_eq!(
            Reference::parse("$fetch.output.body").unwrap(),
            Some(Reference::StepOutput {
                step: "fetch".into(),
                path: vec!["body".into()]
            })
        );
        assert_eq!(
            Reference::parse("$inputs.topic").unwrap(),
            Some(Reference::Input {
                name: "topic".into(),
                path: vec![]
            })
        );
        assert_eq!(Reference::parse("plain text").unwrap(), None);
        assert_eq!(Reference::parse("$$5.00").unwrap(), None);
    }

    #[test]
    fn test_malformed_references_rejected() {
        assert!(Reference::parse("$fetch").is_err());
        assert!(Reference::parse("$fetch.result").is_err());
        assert!(Reference::parse("$inputs").is_err());
        assert!(Reference::parse("$fetch.output..x").is_err());
        assert!(Reference::parse("$ spaced").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["$a.output", "$a.output.items.0", "$inputs.topic.title"] {
            let r = Reference::parse(text).unwrap().unwrap();
            assert_eq!(r.to_string(), text);
        }
    }

    #[test]
    fn test_nested_binding_steps_and_resolve() {
        let raw = json!({
            "text": "$fetch.output.body",
            "meta": {"plan": "$plan.output", "tags": ["x", "$inputs.tag"]},
            "price": "$$5",
            "n": 3
        });
        let binding = Binding::parse(&raw, "$.inputs").unwrap();

        let steps: Vec<_> = binding.referenced_steps().into_iter().collect();
        assert_eq!(steps, vec!["fetch", "plan"]);
        assert!(binding.literal_value().is_none());

        let mut inputs = Map::new();
        inputs.insert("tag".into(), json!("rust"));
        let ctx = ExecutionContext::new(inputs);
        ctx.record_output("fetch", json!({"body": "hello"}));
        ctx.record_output("plan", json!(["a", "b"]));

        let value = binding.resolve(&ctx).unwrap();
        assert_eq!(value["text"], "hello");
        assert_eq!(value["meta"]["plan"], json!(["a", "b"]));
        assert_eq!(value["meta"]["tags"], json!(["x", "rust"]));
        assert_eq!(value["price"], "$5");
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn test_resolve_missing_output_is_schema_error() {
        let binding = Binding::parse(&json!({"x": "$gone.output"}), "$").unwrap();
        let err = binding.resolve(&ExecutionContext::default()).unwrap_err();
        assert!(matches!(err, FlowError::Schema { .. }));
    }

    #[test]
    fn test_parse_error_reports_location() {
        let err = Binding::parse(&json!({"a": ["ok", "$bad"]}), "$.steps[0].inputs").unwrap_err();
        match err {
            FlowError::Schema { path, .. } => assert_eq!(path, "$.steps[0].inputs.a[1]"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
