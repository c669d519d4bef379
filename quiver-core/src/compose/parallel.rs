//! Fan-out composition

use super::{CompositionOptions, names, run_step, with_combined_risk};
use crate::error::{QuiverError, Result};
use crate::tools::ToolHandle;
use serde_json::Value;
use std::sync::Arc;

/// Run every tool concurrently on the same params
///
/// Outputs come back as an array in declaration order. Every step runs to
/// completion so each emits its own step events; if any failed, the first
/// failure in declaration order fails the call.
pub fn parallel(tools: Vec<ToolHandle>, options: CompositionOptions) -> Result<ToolHandle> {
    if tools.is_empty() {
        return Err(QuiverError::Composition(
            "parallel requires at least one tool".to_string(),
        ));
    }

    let builder = options.builder(
        format!("parallel({})", names(&tools)),
        format!("Runs {} concurrently", names(&tools)),
    );
    let definition = with_combined_risk(builder, &tools).build()?;

    let tools = Arc::new(tools);
    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let tools = tools.clone();
        async move {
            let runs = tools
                .iter()
                .enumerate()
                .map(|(index, tool)| run_step(&ctx, index, tool, params.clone()));
            let results = futures::future::join_all(runs).await;

            let mut outputs = Vec::with_capacity(results.len());
            for result in results {
                outputs.push(result?);
            }
            Ok(Value::Array(outputs))
        }
    }))
}
