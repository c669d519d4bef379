//! Partial application

use super::{CompositionOptions, passthrough_builder};
use crate::error::{QuiverError, Result};
use crate::tools::ToolHandle;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Fix some arguments of a tool
///
/// The bound keys are removed from the input schema. At call time the bound
/// values are merged over the caller's params, so a bound value always wins.
///
/// # Errors
///
/// - `bound` is not a JSON object
/// - a bound key is not declared by the schema ([`QuiverError::UnknownKeys`])
/// - the schema cannot omit keys
pub fn bind(tool: ToolHandle, bound: Value, options: CompositionOptions) -> Result<ToolHandle> {
    let Value::Object(bound) = bound else {
        return Err(QuiverError::Composition(format!(
            "bind expects an object of bound params, got {}",
            bound
        )));
    };

    let known = tool.input_schema().keys();
    let mut unknown: Vec<String> = bound
        .keys()
        .filter(|key| !known.contains(key))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(QuiverError::UnknownKeys { keys: unknown });
    }

    let bound_keys: Vec<String> = bound.keys().cloned().collect();
    let schema = tool.input_schema().omit(&bound_keys)?;
    let definition = passthrough_builder(&tool, &options, format!("bind({})", tool.name()))
        .schema(schema)
        .build()?;

    let bound = Arc::new(bound);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let tool = tool.clone();
        let bound = bound.clone();
        async move {
            let mut merged = match params {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            for (key, value) in bound.iter() {
                merged.insert(key.clone(), value.clone());
            }
            Ok(tool.invoke(Value::Object(merged), ctx.nested_options()).await?)
        }
    }))
}
