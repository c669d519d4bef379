//! # Quiver - Governed Tools for Agents
//!
//! Quiver is a runtime for declaring, validating, executing, searching and
//! composing the tools an automated caller (typically an LLM agent) invokes:
//! - Schema-validated arguments with repair hints
//! - Policy hooks and built-in risk checks before every call
//! - Timeout and cancellation races, concurrency limits, session budgets
//! - Structured results with digests and lifecycle events
//! - Relevance-ranked discovery (tags, fuzzy text, embeddings)
//! - Combinators that build new tools from existing ones
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quiver_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = ToolRegistry::new();
//!     registry.register(
//!         ToolDefinition::builder("add")
//!             .description("Add two numbers")
//!             .input_schema(json!({
//!                 "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!                 "required": ["a", "b"]
//!             }))
//!             .build()?,
//!         handler_fn(|params, _ctx| async move {
//!             let sum = params["a"].as_f64().unwrap_or(0.0) + params["b"].as_f64().unwrap_or(0.0);
//!             Ok(json!(sum))
//!         }),
//!     );
//!
//!     let results = registry
//!         .execute(vec![ToolCall::new("add", json!({"a": 1, "b": 2}))], BatchOptions::default())
//!         .await;
//!     assert_eq!(results[0].value(), Some(&json!(3.0)));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **tools**: definitions, handles, the execution engine, policy, registry
//! - **search**: filter predicates and multi-signal ranking over handles
//! - **compose**: pipe, bind, retry, when, tap, parallel, pre/postprocess

pub mod compose;
pub mod config;
pub mod error;
pub mod search;
pub mod telemetry;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::compose::{
        Backoff, CompositionOptions, RetryOptions, bind, compose, parallel, pipe, postprocess,
        preprocess, retry, tap, tap_isolated, when,
    };
    pub use crate::config::{
        BatchConfig, BudgetConfig, ConfigBuilder, ExecutionConfig, PolicyConfig, QuiverConfig,
        SearchConfig,
    };
    pub use crate::error::{QuiverError, Result};
    pub use crate::search::{
        Embedder, MetadataOp, RankAdjustment, ResultShape, SearchHit, SelectedTool, TextWeights,
        TieBreak, ToolQueryCriteria, ToolSearchOptions,
    };
    pub use crate::tools::{
        AbortController, AbortReason, AbortSignal, BatchMode, BatchOptions, DeferredHandler,
        DigestOptions, ErrorCategory, ErrorMode, ExecuteOptions, Outcome, OutputValidationMode,
        PolicyContext, PolicyDecision, PolicyHook, PolicyHooks, ToolCall, ToolDefinition,
        ToolError, ToolEvent, ToolEventKind, ToolEventType, ToolExecutionContext, ToolHandle,
        ToolHandler, ToolRecord, ToolRegistry, ToolResult, ToolRuntime, ToolSummary, handler_fn,
        typed_handler,
    };
}
