//! Conditional dispatch

use super::{CompositionOptions, run_step, with_combined_risk};
use crate::error::Result;
use crate::tools::ToolHandle;
use serde_json::Value;
use std::sync::Arc;

/// Route the input to one of two tools
///
/// `predicate` sees the raw params. With no `when_false`, a false predicate
/// returns the params unchanged. The composed tool accepts any object; each
/// branch validates its own input.
pub fn when<P>(
    predicate: P,
    when_true: ToolHandle,
    when_false: Option<ToolHandle>,
    options: CompositionOptions,
) -> Result<ToolHandle>
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    let branches: Vec<ToolHandle> = std::iter::once(when_true.clone())
        .chain(when_false.clone())
        .collect();
    let default_name = match when_false {
        Some(ref otherwise) => format!("when({}, {})", when_true.name(), otherwise.name()),
        None => format!("when({})", when_true.name()),
    };
    let builder = options.builder(
        default_name,
        format!("Runs {} when the condition holds", when_true.name()),
    );
    let definition = with_combined_risk(builder, &branches).build()?;

    let predicate = Arc::new(predicate);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let predicate = predicate.clone();
        let when_true = when_true.clone();
        let when_false = when_false.clone();
        async move {
            if predicate(&params) {
                return Ok(run_step(&ctx, 0, &when_true, params).await?);
            }
            match when_false {
                Some(otherwise) => Ok(run_step(&ctx, 1, &otherwise, params).await?),
                None => Ok(params),
            }
        }
    }))
}
