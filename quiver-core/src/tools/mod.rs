//! Tool definitions, handles, execution and the registry
//!
//! This module provides the governed execution layer for tools.
//! Key features:
//! - Schema-validated input with diagnostic hints
//! - Registry and per-tool policy hooks with built-in risk checks
//! - Timeout and cancellation races around every handler
//! - Per-tool and per-batch concurrency limits, session budgets
//! - Structured results with digests and lifecycle events
//!
//! # Example
//!
//! ```rust,no_run
//! use quiver_core::tools::{ToolDefinition, ToolHandle};
//! use serde_json::json;
//!
//! # async fn demo() -> quiver_core::error::Result<()> {
//! let definition = ToolDefinition::builder("echo")
//!     .description("Return the input")
//!     .input_schema(json!({"text": {"type": "string"}}))
//!     .build()?;
//! let echo = ToolHandle::from_fn(definition, |params, _ctx| async move { Ok(params) });
//!
//! let result = echo.run(json!({"text": "hi"})).await;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

mod budget;
mod diagnostics;
mod digest;
mod events;
mod handle;
mod handler;
mod limiter;
mod policy;
mod registry;
mod result;
mod runtime;
mod schema;
mod signal;
mod tool;

pub use budget::{BudgetGuard, BudgetUsage};
pub use diagnostics::{DiagnosticReport, Diagnostics, SchemaDiagnostics};
pub use digest::{DigestOptions, canonical_json, digest_value};
pub use events::{
    EventDispatcher, EventHub, Listener, SubscriptionId, ToolEvent, ToolEventKind, ToolEventType,
};
pub use handle::{ToolHandle, ToolSummary};
pub use handler::{
    DeferredHandler, FnHandler, ToolExecutionContext, ToolHandler, handler_fn, typed_handler,
};
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use policy::{
    NEEDS_APPROVAL, PolicyContext, PolicyDecision, PolicyHook, PolicyHooks, RegistryPolicy,
    RiskProfile,
};
pub use registry::{BatchMode, BatchOptions, ErrorMode, ToolRegistry};
pub use result::{
    ErrorCategory, Outcome, OutputValidation, ToolCall, ToolError, ToolFailure, ToolResult,
    UNSERIALIZABLE_PLACEHOLDER, ValidationIssue, failure_message, generate_call_id,
    normalize_failure,
};
pub use runtime::{ExecuteOptions, ToolRuntime};
pub use schema::{JsonSchema, Schema};
pub use signal::{AbortController, AbortReason, AbortSignal, cancelled_message};
pub use tool::{
    OutputValidationMode, RESERVED_METADATA_KEYS, ToolDefinition, ToolDefinitionBuilder,
    ToolRecord, normalize_tags,
};
