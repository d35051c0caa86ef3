//! Built-in local tools (tier 0)

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::debug;

use super::{Capability, InvocationContext, ToolDescriptor};
use crate::contracts::{PropertySchema, Schema};
use crate::context::lookup_path;
use crate::error::FlowError;

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)\s*\}\}")
            .expect("placeholder pattern is a valid regex")
    })
}

/// Replace `{{ name.path }}` placeholders with values from `vars`.
///
/// Strings are inserted as-is, other values as compact JSON. Unknown names
/// are an error listing the first missing placeholder.
pub(crate) fn render_template(template: &str, vars: &Value, tool: &str) -> Result<String, FlowError> {
    let mut missing: Option<String> = None;
    let rendered = placeholder().replace_all(template, |caps: &Captures<'_>| {
        let path: Vec<String> = caps[1].split('.').map(String::from).collect();
        match lookup_path(vars, &path) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(FlowError::capability(tool, format!("no value for placeholder '{}'", name))),
        None => Ok(rendered.into_owned()),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, params: Value) -> Result<T, FlowError> {
    serde_json::from_value(params)
        .map_err(|e| FlowError::schema(format!("$.{}", tool), format!("invalid arguments: {}", e)))
}

/// Returns its params unchanged
pub struct EchoTool;

#[async_trait]
impl Capability for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("echo", 0, "Return the params unchanged")
    }

    async fn invoke(&self, params: Value, _ctx: &InvocationContext) -> Result<Value, FlowError> {
        Ok(params)
    }
}

/// Renders `{{name}}` placeholders from the other params
pub struct TemplateTool;

#[async_trait]
impl Capability for TemplateTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("template", 0, "Render {{name}} placeholders from the params")
            .with_parameters(
                Schema::any().required_property(
                    "template",
                    PropertySchema::string().with_description("Text with {{name}} placeholders"),
                ),
            )
            .with_result(Schema::strict().required_property("text", PropertySchema::string()))
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, FlowError> {
        let template = params
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::schema("$.template", "required property is missing"))?;
        let text = render_template(template, &params, "template")?;
        debug!(step_id = %ctx.step_id, chars = text.len(), "Rendered template");
        Ok(json!({ "text": text }))
    }
}

#[derive(Debug, Deserialize)]
struct PickArgs {
    value: Value,
    path: String,
    #[serde(default)]
    default: Option<Value>,
}

/// Extracts a dotted path from a JSON value
pub struct JsonPickTool;

#[async_trait]
impl Capability for JsonPickTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("json_pick", 0, "Extract a dotted path from a JSON value")
            .with_parameters(
                Schema::strict()
                    .required_property("value", PropertySchema::any())
                    .required_property("path", PropertySchema::string())
                    .property("default", PropertySchema::any()),
            )
    }

    async fn invoke(&self, params: Value, _ctx: &InvocationContext) -> Result<Value, FlowError> {
        let args: PickArgs = parse_args("json_pick", params)?;
        let path: Vec<String> = args
            .path
            .split('.')
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        match lookup_path(&args.value, &path).cloned().or(args.default) {
            Some(value) => Ok(json!({ "value": value })),
            None => Err(FlowError::capability(
                "json_pick",
                format!("path '{}' not found", args.path),
            )),
        }
    }
}

/// Shallow-merges a list of objects, later keys winning
pub struct MergeTool;

#[async_trait]
impl Capability for MergeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("merge", 0, "Shallow-merge objects; later keys win")
            .with_parameters(
                Schema::strict().required_property(
                    "objects",
                    PropertySchema::array().with_length(Some(1), None),
                ),
            )
    }

    async fn invoke(&self, params: Value, _ctx: &InvocationContext) -> Result<Value, FlowError> {
        let Some(Value::Array(objects)) = params.get("objects") else {
            return Err(FlowError::schema("$.objects", "expected an array of objects"));
        };

        let mut merged = Map::new();
        for (i, item) in objects.iter().enumerate() {
            match item {
                Value::Object(map) => merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
                Value::Null => {}
                _ => {
                    return Err(FlowError::capability(
                        "merge",
                        format!("objects[{}] is not an object", i),
                    ))
                }
            }
        }
        Ok(Value::Object(merged))
    }
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    filename: String,
    content: Value,
}

/// Produces an artifact-shaped payload; the artifact extractor writes it
pub struct WriteFileTool;

#[async_trait]
impl Capability for WriteFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("write_file", 0, "Emit a file artifact for the run")
            .with_parameters(
                Schema::strict()
                    .required_property("filename", PropertySchema::string().with_length(Some(1), Some(255)))
                    .required_property("content", PropertySchema::any()),
            )
            .with_result(Schema::any().required_property("artifact", PropertySchema::object()))
    }

    async fn invoke(&self, params: Value, _ctx: &InvocationContext) -> Result<Value, FlowError> {
        let args: WriteFileArgs = parse_args("write_file", params)?;
        let content = match args.content {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other)?,
        };
        let bytes = content.len();
        Ok(json!({
            "artifact": { "filename": args.filename, "content": content },
            "bytes": bytes,
        }))
    }
}
