//! Sequential composition

use super::{CompositionOptions, ensure_active, names, run_step, with_combined_risk};
use crate::error::{QuiverError, Result};
use crate::tools::ToolHandle;
use std::sync::Arc;

/// Chain tools left to right: each output feeds the next tool
///
/// The composed tool takes the first tool's input schema. Each step validates
/// its own input. The first failing step stops the chain; its error is wrapped
/// as `Step {index} ({name}) failed: ...` with the original in `details`.
pub fn pipe(tools: Vec<ToolHandle>, options: CompositionOptions) -> Result<ToolHandle> {
    let Some(first) = tools.first() else {
        return Err(QuiverError::Composition(
            "pipe requires at least one tool".to_string(),
        ));
    };

    let builder = options
        .builder(
            format!("pipe({})", names(&tools)),
            format!(
                "Runs {} in sequence",
                tools.iter().map(ToolHandle::name).collect::<Vec<_>>().join(" -> ")
            ),
        )
        .schema(first.input_schema().clone());
    let definition = with_combined_risk(builder, &tools).build()?;

    let steps = Arc::new(tools);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let steps = steps.clone();
        async move {
            let mut value = params;
            for (index, step) in steps.iter().enumerate() {
                ensure_active(&ctx)?;
                value = run_step(&ctx, index, step, value).await?;
            }
            Ok(value)
        }
    }))
}

/// Chain tools right to left: `compose([f, g])` runs `g` then `f`
pub fn compose(mut tools: Vec<ToolHandle>, options: CompositionOptions) -> Result<ToolHandle> {
    tools.reverse();
    let options = CompositionOptions {
        name: options
            .name
            .or_else(|| Some(format!("compose({})", names_reversed(&tools)))),
        ..options
    };
    pipe(tools, options)
}

fn names_reversed(tools: &[ToolHandle]) -> String {
    tools
        .iter()
        .rev()
        .map(ToolHandle::name)
        .collect::<Vec<_>>()
        .join(", ")
}
