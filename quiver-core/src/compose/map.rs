//! Input and output mapping around a single tool

use super::{CompositionOptions, passthrough_builder, wrap_builder};
use crate::error::Result;
use crate::tools::{JsonSchema, ToolHandle};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Run a side effect on the output, passing the output through
///
/// An effect error fails the call.
pub fn tap<F>(tool: ToolHandle, effect: F, options: CompositionOptions) -> Result<ToolHandle>
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let definition = passthrough_builder(&tool, &options, format!("tap({})", tool.name())).build()?;
    let effect = Arc::new(effect);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let tool = tool.clone();
        let effect = effect.clone();
        async move {
            let output = tool.invoke(params, ctx.nested_options()).await?;
            effect(&output)?;
            Ok(output)
        }
    }))
}

/// Like [`tap`], but effect errors and panics are logged and ignored
pub fn tap_isolated<F>(tool: ToolHandle, effect: F, options: CompositionOptions) -> Result<ToolHandle>
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let effect = Arc::new(effect);
    tap(
        tool,
        move |output: &Value| {
            match std::panic::catch_unwind(AssertUnwindSafe(|| effect(output))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::warn!(error = %error, "Tap effect failed"),
                Err(_) => tracing::warn!("Tap effect panicked"),
            }
            Ok(())
        },
        options,
    )
}

/// Transform params before they reach the tool
///
/// The composed tool accepts any object; the wrapped tool validates the
/// mapped params. Tags and metadata are preserved.
pub fn preprocess<F>(tool: ToolHandle, mapper: F, options: CompositionOptions) -> Result<ToolHandle>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    let definition = passthrough_builder(&tool, &options, format!("preprocess({})", tool.name()))
        .schema(Arc::new(JsonSchema::any_object()?))
        .build()?;
    let mapper = Arc::new(mapper);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let tool = tool.clone();
        let mapper = mapper.clone();
        async move {
            let mapped = mapper(params)?;
            Ok(tool.invoke(mapped, ctx.nested_options()).await?)
        }
    }))
}

/// Transform the tool's output
///
/// Keeps the tool's input schema, tags and metadata. The output schema is
/// not carried over.
pub fn postprocess<F>(tool: ToolHandle, mapper: F, options: CompositionOptions) -> Result<ToolHandle>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    let definition = wrap_builder(&tool, &options, format!("postprocess({})", tool.name())).build()?;
    let mapper = Arc::new(mapper);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let tool = tool.clone();
        let mapper = mapper.clone();
        async move {
            let output = tool.invoke(params, ctx.nested_options()).await?;
            mapper(output)
        }
    }))
}
