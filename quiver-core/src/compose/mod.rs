//! Tool composition
//!
//! Every combinator returns a new [`ToolHandle`] whose handler drives the
//! wrapped tools through their own engine (`invoke` with the caller's signal),
//! so composed tools validate, honor policy and emit events like any other
//! tool, and compose further.
//!
//! Setup-time misuse (no tools, unknown bound keys, zero attempts) fails
//! construction with a [`QuiverError`](crate::error::QuiverError).
//!
//! # Example
//!
//! ```rust,ignore
//! let tool = pipe(vec![parse_number, double], CompositionOptions::named("double_str"))?;
//! let doubled = tool.invoke(json!({"str": "21"}), ExecuteOptions::default()).await?;
//! ```

mod bind;
mod branch;
mod map;
mod parallel;
mod pipe;
mod retry;

pub use bind::bind;
pub use branch::when;
pub use map::{postprocess, preprocess, tap, tap_isolated};
pub use parallel::parallel;
pub use pipe::{compose, pipe};
pub use retry::{Backoff, RetryOptions, retry};

use crate::tools::{
    RiskProfile, ToolDefinition, ToolDefinitionBuilder, ToolError, ToolEventKind,
    ToolExecutionContext, ToolHandle,
};
use serde_json::{Value, json};

/// Name, description and tags of a composed tool
#[derive(Debug, Clone, Default)]
pub struct CompositionOptions {
    /// Name; derived from the wrapped tools when unset
    pub name: Option<String>,

    /// Description; derived when unset
    pub description: Option<String>,

    /// Extra tags
    pub tags: Vec<String>,
}

impl CompositionOptions {
    /// Options with a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Start a definition builder from these options
    pub(crate) fn builder(&self, default_name: String, default_description: String) -> ToolDefinitionBuilder {
        ToolDefinition::builder(self.name.clone().unwrap_or(default_name))
            .description(self.description.clone().unwrap_or(default_description))
            .tags(self.tags.iter().cloned())
    }
}

/// Builder seeded with a wrapped tool's schema, tags and metadata
pub(crate) fn wrap_builder(
    tool: &ToolHandle,
    options: &CompositionOptions,
    default_name: String,
) -> ToolDefinitionBuilder {
    let mut builder = options
        .builder(default_name, tool.description().to_string())
        .schema(tool.input_schema().clone())
        .tags(tool.tags().iter().cloned());
    for (key, value) in tool.metadata() {
        builder = builder.metadata(key.clone(), value.clone());
    }
    builder
}

/// Carry the strongest risk flags of several tools onto a composed one
/// [`wrap_builder`] plus the wrapped tool's output contract
///
/// For wrappers that return the wrapped output unchanged. Timeout and
/// concurrency are not copied: the wrapped tool enforces them on every
/// invocation.
pub(crate) fn passthrough_builder(
    tool: &ToolHandle,
    options: &CompositionOptions,
    default_name: String,
) -> ToolDefinitionBuilder {
    let definition = tool.definition();
    let mut builder = wrap_builder(tool, options, default_name);
    if let Some(schema) = definition.output_schema() {
        builder = builder.output(schema.clone());
    }
    if let Some(mode) = definition.output_validation() {
        builder = builder.output_validation(mode);
    }
    builder
}

pub(crate) fn with_combined_risk(mut builder: ToolDefinitionBuilder, tools: &[ToolHandle]) -> ToolDefinitionBuilder {
    let risks: Vec<RiskProfile> = tools
        .iter()
        .map(|tool| RiskProfile::classify(tool.metadata(), tool.tags()))
        .collect();
    if risks.iter().any(|risk| risk.mutates) {
        builder = builder.mutates(true);
    }
    if risks.iter().any(|risk| risk.dangerous) {
        builder = builder.dangerous(true);
    }
    builder
}

pub(crate) fn names(tools: &[ToolHandle]) -> String {
    tools.iter().map(ToolHandle::name).collect::<Vec<_>>().join(", ")
}

/// Wrap a step's error with its position
pub(crate) fn step_failure(index: usize, name: &str, error: ToolError) -> ToolError {
    let original = serde_json::to_value(&error).unwrap_or(Value::Null);
    let mut wrapped = ToolError::new(
        error.category,
        format!("Step {} ({}) failed: {}", index, name, error.message),
    )
    .with_code("STEP_FAILED")
    .with_details(json!({
        "stepIndex": index,
        "stepName": name,
        "originalError": original,
    }));
    wrapped.issues = error.issues;
    wrapped
}

/// Run one step with step events; a failure comes back wrapped
pub(crate) async fn run_step(
    ctx: &ToolExecutionContext,
    index: usize,
    tool: &ToolHandle,
    input: Value,
) -> std::result::Result<Value, ToolError> {
    let name = tool.name().to_string();
    ctx.dispatch.emit(ToolEventKind::StepStart {
        index,
        name: name.clone(),
    });

    match tool.invoke(input, ctx.nested_options()).await {
        Ok(output) => {
            ctx.dispatch.emit(ToolEventKind::StepComplete { index, name });
            Ok(output)
        }
        Err(error) => {
            tracing::debug!(step = index, tool = %name, error = %error, "Composed step failed");
            ctx.dispatch.emit(ToolEventKind::StepError {
                index,
                name: name.clone(),
                message: error.message.clone(),
            });
            Err(step_failure(index, &name, error))
        }
    }
}

/// Fail with `cancelled` if the call was aborted
pub(crate) fn ensure_active(ctx: &ToolExecutionContext) -> std::result::Result<(), ToolError> {
    if ctx.is_cancelled() {
        return Err(ToolError::cancelled(ctx.signal.message()));
    }
    Ok(())
}
