//! Tool execution engine
//!
//! Each call moves through a linear state machine with early exits:
//!
//! ```text
//! Start -> Validating -> PolicyCheck -> Executing -> Settled
//! ```
//!
//! Cancellation is checked at every phase boundary and preempts whatever the
//! phase produced. The handler runs on its own task, raced against the abort
//! signal and a timer. The loser of the race is not stopped: a handler that
//! ignores its signal keeps running in the background.

use super::diagnostics::{Diagnostics, SchemaDiagnostics, collect_hints};
use super::digest::digest_value;
use super::events::{EventDispatcher, ToolEventKind};
use super::handle::HandleInner;
use super::handler::ToolExecutionContext;
use super::policy::{PolicyContext, PolicyDecision};
use super::result::{
    ErrorCategory, OutputValidation, ToolCall, ToolError, ToolResult, normalize_failure,
};
use super::signal::{AbortReason, AbortSignal};
use super::tool::OutputValidationMode;
use crate::config::ExecutionConfig;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Caller abort signal
    pub signal: Option<AbortSignal>,

    /// Timeout for this call, overriding the tool and runtime defaults
    pub timeout: Option<Duration>,

    /// Validate and check policy, but do not invoke the handler
    pub dry_run: bool,

    /// Configuration passed to policy hooks and the handler
    pub configuration: Value,

    /// Call metadata passed to the handler
    pub metadata: Value,
}

impl ExecuteOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set abort signal
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable dry run
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Set configuration
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    /// Set call metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Engine-wide defaults shared by the handles of a registry
#[derive(Clone)]
pub struct ToolRuntime {
    default_timeout: Option<Duration>,
    output_validation: OutputValidationMode,
    diagnostics: Arc<dyn Diagnostics>,
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("default_timeout", &self.default_timeout)
            .field("output_validation", &self.output_validation)
            .finish_non_exhaustive()
    }
}

impl Default for ToolRuntime {
    fn default() -> Self {
        Self {
            default_timeout: None,
            output_validation: OutputValidationMode::default(),
            diagnostics: Arc::new(SchemaDiagnostics),
        }
    }
}

impl ToolRuntime {
    /// Create a runtime with no default timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runtime from configuration
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            default_timeout: config.default_timeout,
            output_validation: config.output_validation,
            ..Self::default()
        }
    }

    /// Set the timeout used when neither call nor tool sets one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the default output validation mode
    pub fn with_output_validation(mut self, mode: OutputValidationMode) -> Self {
        self.output_validation = mode;
        self
    }

    /// Replace the diagnostics used for validation hints
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Default timeout
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Execute one call against a handle; always settles into a result
    pub(crate) async fn execute(
        &self,
        handle: &HandleInner,
        call: ToolCall,
        options: ExecuteOptions,
    ) -> ToolResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let definition = &handle.definition;
        let signal = options.signal.clone().unwrap_or_default();
        let dispatch = EventDispatcher::new(
            handle.events.clone(),
            handle.id.clone(),
            definition.name(),
            Some(call.id.clone()),
        );

        tracing::debug!(tool = %definition.name(), call_id = %call.id, "Executing tool");
        dispatch.emit(ToolEventKind::ExecuteStart);

        let mut policy_ctx = PolicyContext {
            tool_name: definition.name().to_string(),
            tool_call: call.clone(),
            params: call.arguments.clone(),
            tags: definition.tags().to_vec(),
            metadata: definition.metadata().clone(),
            configuration: options.configuration.clone(),
        };

        let result = self
            .run_phases(handle, &call, &options, &signal, &dispatch, &mut policy_ctx)
            .await
            .with_tool_name(definition.name())
            .with_timing(started_at, clock.elapsed());

        handle.policy.after_execute(&policy_ctx, &result).await;

        tracing::debug!(
            tool = %definition.name(),
            call_id = %call.id,
            outcome = ?result.outcome,
            category = ?result.error_category,
            duration_ms = result.duration.as_millis() as u64,
            "Tool call settled"
        );
        dispatch.emit(ToolEventKind::Settled {
            outcome: result.outcome,
        });
        result
    }

    async fn run_phases(
        &self,
        handle: &HandleInner,
        call: &ToolCall,
        options: &ExecuteOptions,
        signal: &AbortSignal,
        dispatch: &EventDispatcher,
        policy_ctx: &mut PolicyContext,
    ) -> ToolResult {
        let definition = &handle.definition;

        // Start
        if signal.is_aborted() {
            return cancelled(call, signal, dispatch);
        }

        // Validating
        let schema = definition.input_schema();
        let params = match schema.parse(&call.arguments) {
            Ok(params) => params,
            Err(issues) => {
                let hints = collect_hints(
                    self.diagnostics.as_ref(),
                    schema.as_ref(),
                    &call.arguments,
                    &issues,
                );
                tracing::debug!(
                    tool = %definition.name(),
                    call_id = %call.id,
                    issues = issues.len(),
                    "Tool arguments failed validation"
                );
                dispatch.emit(ToolEventKind::ValidateError {
                    issues: issues.clone(),
                    hints,
                });
                if signal.is_aborted() {
                    return cancelled(call, signal, dispatch);
                }
                return ToolResult::failure(call, ToolError::validation(issues));
            }
        };
        dispatch.emit(ToolEventKind::ValidateSuccess);
        policy_ctx.params = params.clone();

        if signal.is_aborted() {
            return cancelled(call, signal, dispatch);
        }

        // PolicyCheck
        let decision = handle.policy.before_execute(policy_ctx).await;
        if signal.is_aborted() {
            return cancelled(call, signal, dispatch);
        }
        if let PolicyDecision::Deny {
            ref reason,
            ref status,
        } = decision
        {
            tracing::info!(
                tool = %definition.name(),
                call_id = %call.id,
                reason = %reason,
                "Tool call denied by policy"
            );
            dispatch.emit(ToolEventKind::PolicyDenied {
                reason: reason.clone(),
                status: status.clone(),
            });
            let error = ToolError::denied(reason.clone());
            return if decision.requires_approval() {
                ToolResult::action_required(call, error)
            } else {
                ToolResult::failure(call, error)
            };
        }

        let digest = definition.digest();
        let input_digest = digest
            .input
            .then(|| digest_value(&params, digest.length));

        if options.dry_run {
            dispatch.emit(ToolEventKind::ExecuteSuccess { duration_ms: 0 });
            let mut result = ToolResult::success(
                call,
                json!({"dry_run": true, "tool": definition.name(), "params": params}),
            );
            result.input_digest = input_digest;
            return result;
        }

        if signal.is_aborted() {
            return cancelled(call, signal, dispatch);
        }

        // Executing
        let permit = tokio::select! {
            biased;
            _ = signal.cancelled() => return cancelled(call, signal, dispatch),
            permit = handle.limiter.acquire() => permit,
        };

        let timeout = options
            .timeout
            .or(definition.timeout())
            .or(self.default_timeout);
        let call_signal = signal.child();
        let ctx = ToolExecutionContext {
            call_id: call.id.clone(),
            tool_name: definition.name().to_string(),
            signal: call_signal.clone(),
            timeout,
            metadata: options.metadata.clone(),
            configuration: options.configuration.clone(),
            dispatch: dispatch.clone(),
        };

        let handler = handle.handler.clone();
        let invoked = Instant::now();
        let mut task = tokio::spawn(async move {
            let _permit = permit;
            handler.call(params, ctx).await
        });

        let timer = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        let joined = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                tracing::debug!(tool = %definition.name(), call_id = %call.id, "Tool call aborted while running");
                return cancelled(call, signal, dispatch);
            }
            joined = &mut task => joined,
            _ = timer => {
                let duration = timeout.unwrap_or_default();
                let error = ToolError::timeout(duration);
                call_signal.fire(Some(AbortReason::Text(error.message.clone())));
                tracing::warn!(
                    tool = %definition.name(),
                    call_id = %call.id,
                    timeout_ms = duration.as_millis() as u64,
                    "Tool call timed out"
                );
                return execute_error(call, error, dispatch);
            }
        };

        let output = match joined {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                let error = normalize_failure(error);
                tracing::debug!(
                    tool = %definition.name(),
                    call_id = %call.id,
                    error = %error,
                    "Tool handler failed"
                );
                return execute_error(call, error, dispatch);
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "Tool handler panicked"
                } else {
                    "Tool handler task was cancelled"
                };
                tracing::warn!(tool = %definition.name(), call_id = %call.id, "{}", message);
                return execute_error(call, ToolError::internal(message), dispatch);
            }
        };

        // A late abort still wins over a finished handler
        if signal.is_aborted() {
            return cancelled(call, signal, dispatch);
        }

        let mode = definition
            .output_validation()
            .unwrap_or(self.output_validation);
        let output_validation = match (definition.output_schema(), mode) {
            (Some(schema), OutputValidationMode::Annotate | OutputValidationMode::Strict) => {
                Some(match schema.parse(&output) {
                    Ok(_) => OutputValidation {
                        valid: true,
                        issues: Vec::new(),
                    },
                    Err(issues) => OutputValidation {
                        valid: false,
                        issues,
                    },
                })
            }
            _ => None,
        };

        if mode == OutputValidationMode::Strict {
            if let Some(report) = output_validation.as_ref().filter(|r| !r.valid) {
                let error = ToolError::output_validation(report.issues.clone());
                let mut result = execute_error(call, error, dispatch);
                result.input_digest = input_digest;
                result.output_validation = output_validation;
                return result;
            }
        }

        dispatch.emit(ToolEventKind::ExecuteSuccess {
            duration_ms: invoked.elapsed().as_millis() as u64,
        });

        let output_digest = digest
            .output
            .then(|| digest_value(&output, digest.length));
        let mut result = ToolResult::success(call, output);
        result.input_digest = input_digest;
        result.output_digest = output_digest;
        result.output_validation = output_validation;
        result
    }
}

fn cancelled(call: &ToolCall, signal: &AbortSignal, dispatch: &EventDispatcher) -> ToolResult {
    execute_error(call, ToolError::cancelled(signal.message()), dispatch)
}

fn execute_error(call: &ToolCall, error: ToolError, dispatch: &EventDispatcher) -> ToolResult {
    dispatch.emit(ToolEventKind::ExecuteError {
        category: error.category,
        message: error.message.clone(),
    });
    if error.category == ErrorCategory::Cancelled {
        tracing::debug!(call_id = %call.id, message = %error.message, "Tool call cancelled");
    }
    ToolResult::failure(call, error)
}

#[cfg(test)]
mod runtime_tests {
    use super::*;

    #[test]
    fn test_execute_options_builder() {
        let signal = AbortSignal::new();
        let options = ExecuteOptions::new()
            .with_signal(signal)
            .with_timeout(Duration::from_millis(100))
            .with_configuration(json!({"mode": "ci"}))
            .dry_run();

        assert!(options.signal.is_some());
        assert_eq!(options.timeout, Some(Duration::from_millis(100)));
        assert!(options.dry_run);
        assert_eq!(options.configuration["mode"], json!("ci"));
    }

    #[test]
    fn test_runtime_from_config() {
        let runtime = ToolRuntime::from_config(&ExecutionConfig {
            default_timeout: Some(Duration::from_secs(5)),
            output_validation: OutputValidationMode::Strict,
        });
        assert_eq!(runtime.default_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(runtime.output_validation, OutputValidationMode::Strict);
    }
}
