//! Schema capability
//!
//! The engine treats a schema as an opaque validator that can also report its
//! top-level keys and drop a subset of them. [`JsonSchema`] is the bundled
//! implementation, compiled once with `jsonschema`.

use super::result::ValidationIssue;
use crate::error::{QuiverError, Result};
use jsonschema::JSONSchema;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Object-shaped validator consumed by tools
pub trait Schema: Send + Sync + std::fmt::Debug {
    /// Validate a value, returning the parsed value or the issues found
    fn parse(&self, value: &Value) -> std::result::Result<Value, Vec<ValidationIssue>>;

    /// Top-level property keys, sorted
    fn keys(&self) -> Vec<String>;

    /// Required top-level keys, sorted
    fn required_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// A schema without the given keys
    ///
    /// Schemas that cannot drop keys return [`QuiverError::Schema`].
    fn omit(&self, keys: &[String]) -> Result<Arc<dyn Schema>> {
        let _ = keys;
        Err(QuiverError::Schema(
            "schema does not support omitting keys".to_string(),
        ))
    }

    /// JSON Schema rendering, for discovery and shape matching
    fn to_json(&self) -> Value;
}

/// Whether `value` has the JSON type the schema keyword `key` expects
///
/// A keyword holding the wrong kind of value is an argument name, as in
/// `{"description": {"type": "string"}}`.
fn is_schema_keyword(key: &str, value: &Value) -> bool {
    match key {
        "$schema" | "$id" | "$ref" | "title" | "description" => value.is_string(),
        "type" => value.is_string() || value.is_array(),
        "properties" | "patternProperties" | "$defs" | "definitions" => value.is_object(),
        "required" | "allOf" | "anyOf" | "oneOf" => value.is_array(),
        "additionalProperties" | "not" => value.is_object() || value.is_boolean(),
        _ => false,
    }
}

/// JSON Schema backed validator
#[derive(Clone)]
pub struct JsonSchema {
    raw: Value,
    compiled: Arc<JSONSchema>,
}

impl std::fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchema").field("raw", &self.raw).finish()
    }
}

impl JsonSchema {
    /// Build an object schema, coercing accepted shorthand forms
    ///
    /// Accepts `{"type": "object", ...}`, a schema without `type` (treated as an
    /// object schema) and a bare property map. Anything else is rejected.
    pub fn new(schema: Value) -> Result<Self> {
        let raw = coerce_object_schema(schema)?;
        Self::compile(raw)
    }

    /// Schema accepting any object
    pub fn any_object() -> Result<Self> {
        Self::compile(json!({"type": "object"}))
    }

    /// Build a schema for tool output, which need not be an object
    pub fn for_output(schema: Value) -> Result<Self> {
        if !schema.is_object() && !schema.is_boolean() {
            return Err(QuiverError::Schema(format!(
                "output schema must be a JSON object, got {}",
                schema
            )));
        }
        Self::compile(schema)
    }

    fn compile(raw: Value) -> Result<Self> {
        let compiled = JSONSchema::compile(&raw)
            .map_err(|error| QuiverError::Schema(format!("failed to compile schema: {}", error)))?;
        Ok(Self {
            raw,
            compiled: Arc::new(compiled),
        })
    }

    /// Validate without coercion, collecting every issue
    pub fn check(&self, value: &Value) -> std::result::Result<(), Vec<ValidationIssue>> {
        self.compiled.validate(value).map_err(|errors| {
            errors
                .map(|error| {
                    let schema_path = error.schema_path.to_string();
                    let issue = ValidationIssue::new(error.instance_path.to_string(), error.to_string());
                    match schema_path.rsplit('/').next() {
                        Some(code) if !code.is_empty() => issue.with_code(code),
                        _ => issue,
                    }
                })
                .collect()
        })
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.raw.get("properties").and_then(Value::as_object)
    }
}

fn coerce_object_schema(schema: Value) -> Result<Value> {
    let Value::Object(mut map) = schema else {
        return Err(QuiverError::Schema(format!(
            "input schema must be object-shaped, got {}",
            schema
        )));
    };

    match map.get("type") {
        Some(Value::String(kind)) if kind == "object" => return Ok(Value::Object(map)),
        Some(other) if is_schema_keyword("type", other) => {
            return Err(QuiverError::Schema(format!(
                "input schema must describe an object, got type {}",
                other
            )));
        }
        _ => {}
    }

    if map.is_empty() || map.iter().any(|(key, value)| is_schema_keyword(key, value)) {
        map.insert("type".to_string(), Value::String("object".to_string()));
        return Ok(Value::Object(map));
    }

    // Bare property map: every entry must itself be a schema
    if map.values().all(|value| value.is_object() || value.is_boolean()) {
        return Ok(json!({"type": "object", "properties": Value::Object(map)}));
    }

    Err(QuiverError::Schema(
        "input schema is neither a JSON Schema object nor a property map".to_string(),
    ))
}

impl Schema for JsonSchema {
    fn parse(&self, value: &Value) -> std::result::Result<Value, Vec<ValidationIssue>> {
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value.clone()
        };
        self.check(&value)?;
        Ok(value)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .properties()
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn required_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .raw
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn omit(&self, keys: &[String]) -> Result<Arc<dyn Schema>> {
        let mut raw = self.raw.clone();
        if let Some(props) = raw.get_mut("properties").and_then(Value::as_object_mut) {
            for key in keys {
                props.remove(key);
            }
        }
        if let Some(required) = raw.get_mut("required").and_then(Value::as_array_mut) {
            required.retain(|item| {
                item.as_str()
                    .map(|name| !keys.iter().any(|key| key == name))
                    .unwrap_or(true)
            });
        }
        Ok(Arc::new(Self::compile(raw)?))
    }

    fn to_json(&self) -> Value {
        self.raw.clone()
    }
}
