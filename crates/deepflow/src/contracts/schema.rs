//! Parameter and result schemas
//!
//! A deliberately small subset of JSON Schema: an object with typed
//! properties, required keys, numeric ranges, string/array length bounds and
//! enumerated values. Validation errors are [`FlowError::Schema`] with a
//! JSON-path-like location (`$.params.url`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::FlowError;

/// JSON value types a property may declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl ValueType {
    /// Check whether a value has this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Any => "any",
        }
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema for a single property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Minimum length for strings (chars) and arrays (items)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl PropertySchema {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            ..Default::default()
        }
    }

    pub fn string() -> Self {
        Self::new(ValueType::String)
    }

    pub fn number() -> Self {
        Self::new(ValueType::Number)
    }

    pub fn integer() -> Self {
        Self::new(ValueType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(ValueType::Boolean)
    }

    pub fn array() -> Self {
        Self::new(ValueType::Array)
    }

    pub fn object() -> Self {
        Self::new(ValueType::Object)
    }

    pub fn any() -> Self {
        Self::new(ValueType::Any)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_length(mut self, min_length: Option<usize>, max_length: Option<usize>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    pub fn with_enum(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Validate a value against this property schema
    pub fn validate(&self, path: &str, value: &Value) -> Result<(), FlowError> {
        if !self.value_type.matches(value) {
            return Err(FlowError::schema(
                path,
                format!("expected {}, found {}", self.value_type.name(), type_of(value)),
            ));
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(FlowError::schema(path, format!("{} is below minimum {}", n, min)));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(FlowError::schema(path, format!("{} is above maximum {}", n, max)));
                }
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(FlowError::schema(
                        path,
                        format!("length {} is shorter than {}", len, min),
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(FlowError::schema(
                        path,
                        format!("length {} is longer than {}", len, max),
                    ));
                }
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(FlowError::schema(
                    path,
                    format!("{} is not one of {}", value, Value::Array(allowed.clone())),
                ));
            }
        }

        Ok(())
    }
}

/// Object schema with typed properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Whether keys not listed in `properties` are accepted
    #[serde(default = "default_additional")]
    pub additional_properties: bool,
}

fn default_additional() -> bool {
    true
}

impl Default for Schema {
    fn default() -> Self {
        Self::any()
    }
}

impl Schema {
    /// Schema accepting any object
    pub fn any() -> Self {
        Self {
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: true,
        }
    }

    /// Closed object schema (unknown keys rejected)
    pub fn strict() -> Self {
        Self {
            additional_properties: false,
            ..Self::any()
        }
    }

    /// Add an optional property
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Add a required property
    pub fn required_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Check that every required key is among `present`
    pub fn check_required<'a>(
        &self,
        path: &str,
        present: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), FlowError> {
        let present: Vec<&str> = present.into_iter().collect();
        for key in &self.required {
            if !present.contains(&key.as_str()) {
                return Err(FlowError::schema(
                    format!("{}.{}", path, key),
                    "required property is missing",
                ));
            }
        }
        Ok(())
    }

    /// Validate one property value by name
    pub fn check_property(&self, path: &str, key: &str, value: &Value) -> Result<(), FlowError> {
        let location = format!("{}.{}", path, key);
        match self.properties.get(key) {
            Some(prop) => prop.validate(&location, value),
            None if self.additional_properties => Ok(()),
            None => Err(FlowError::schema(location, "unknown property")),
        }
    }

    /// Validate a complete value
    pub fn validate(&self, path: &str, value: &Value) -> Result<(), FlowError> {
        let object = match value {
            Value::Object(map) => map,
            // An open schema with no properties accepts any payload
            _ if self.properties.is_empty() && self.required.is_empty() && self.additional_properties => {
                return Ok(());
            }
            other => {
                return Err(FlowError::schema(
                    path,
                    format!("expected object, found {}", type_of(other)),
                ))
            }
        };

        self.check_required(path, object.keys().map(String::as_str))?;
        for (key, value) in object {
            self.check_property(path, key, value)?;
        }
        Ok(())
    }

    /// JSON Schema rendering (used for tool catalogues and model prompts)
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for (name, prop) in &self.properties {
            let mut entry = serde_json::to_value(prop).unwrap_or_else(|_| json!({}));
            if prop.value_type == ValueType::Any {
                if let Some(obj) = entry.as_object_mut() {
                    obj.remove("type");
                }
            }
            properties.insert(name.clone(), entry);
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
            "additionalProperties": self.additional_properties,
        })
    }
}
