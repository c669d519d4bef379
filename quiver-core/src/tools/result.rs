//! Tool calls, structured results and the error taxonomy
//!
//! Every [`ToolCall`] settles into exactly one [`ToolResult`], whichever branch
//! the execution engine takes. Failures carry a [`ToolError`] whose
//! [`ErrorCategory`] tells the caller whether retrying can help.

use super::digest::canonical_json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Placeholder used when a thrown value cannot be rendered
pub const UNSERIALIZABLE_PLACEHOLDER: &str = "[unserializable error]";

/// Generate a fresh, collision-improbable call id
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// A request to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Caller-supplied or generated call id
    #[serde(default = "generate_call_id")]
    pub id: String,

    /// Tool name (or id) to invoke
    pub name: String,

    /// Raw, unvalidated arguments
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call with a generated id
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: generate_call_id(),
            name: name.into(),
            arguments,
        }
    }

    /// Use a caller-supplied id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Terminal outcome of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The handler produced a value
    Success,
    /// Something failed; see [`ToolResult::error`]
    Error,
    /// Policy requires a human (or another system) to act before retrying
    ActionRequired,
}

/// Error category taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Input failed schema validation (not retryable - fix args)
    Validation,

    /// Policy refused the call (not retryable unless policy changes)
    Denied,

    /// Handler exceeded its time budget (retryable)
    Timeout,

    /// Caller aborted (terminal)
    Cancelled,

    /// Handler threw or rejected
    Internal,

    /// No such tool name or id
    NotFound,

    /// Session budget exhausted before dispatch
    BudgetExceeded,
}

impl ErrorCategory {
    /// Check if this category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Timeout)
    }

    /// Check if this category is fatal (never retry)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Validation
                | ErrorCategory::Denied
                | ErrorCategory::Cancelled
                | ErrorCategory::NotFound
                | ErrorCategory::BudgetExceeded
        )
    }

    /// Wire name of this category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Denied => "denied",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::BudgetExceeded => "budget-exceeded",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation issue for a specific path in the arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer into the validated value ("" for the root)
    pub path: String,

    /// Error message
    pub message: String,

    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationIssue {
    /// Create a new validation issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        match self.code {
            Some(ref code) => write!(f, "[{}] {}: {}", code, path, self.message),
            None => write!(f, "{}: {}", path, self.message),
        }
    }
}

/// Structured tool error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    /// Error category (determines retryability)
    pub category: ErrorCategory,

    /// Human-readable error message
    pub message: String,

    /// Machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Validation issues, when the category is `validation`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,

    /// Additional structured context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Suggested retry delay
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_millis"
    )]
    pub retry_after: Option<Duration>,
}

impl ToolError {
    /// Create a new tool error
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            code: None,
            issues: Vec::new(),
            details: None,
            retry_after: None,
        }
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Add retry delay
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Create a validation error from schema issues
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        let summary = if issues.is_empty() {
            "invalid arguments".to_string()
        } else {
            issues
                .iter()
                .map(|issue| issue.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        };
        Self {
            category: ErrorCategory::Validation,
            message: format!("Validation failed: {}", summary),
            code: Some("VALIDATION_FAILED".to_string()),
            issues,
            details: None,
            retry_after: None,
        }
    }

    /// Create a validation error for a handler output that failed its schema
    pub fn output_validation(issues: Vec<ValidationIssue>) -> Self {
        let mut error = Self::validation(issues);
        error.message = format!("Output {}", error.message.replacen("Validation", "validation", 1));
        error.code = Some("OUTPUT_VALIDATION_FAILED".to_string());
        error
    }

    /// Create a policy denial
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Denied, reason).with_code("POLICY_DENIED")
    }

    /// Create a timeout error
    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("Tool execution timed out after {}ms", duration.as_millis()),
        )
        .with_code("TIMEOUT")
        .with_retry_after(Duration::from_secs(1))
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, message).with_code("CANCELLED")
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message).with_code("INTERNAL_ERROR")
    }

    /// Create a not-found error
    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorCategory::NotFound, format!("Tool '{}' not found", name))
            .with_code("TOOL_NOT_FOUND")
    }

    /// Create a budget-exceeded error
    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::BudgetExceeded, message).with_code("BUDGET_EXCEEDED")
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl std::error::Error for ToolError {}

/// An arbitrary value thrown by a handler
///
/// Handlers that want to fail with something other than a plain error wrap it
/// here so the engine can render it predictably.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolFailure {
    /// A plain message
    Message(String),
    /// A structured value, rendered as key-sorted JSON
    Data(Value),
    /// A value that could not be serialized
    Opaque,
}

impl ToolFailure {
    /// Fail with a message
    pub fn message(message: impl Into<String>) -> Self {
        ToolFailure::Message(message.into())
    }

    /// Fail with a serializable value, degrading to [`ToolFailure::Opaque`]
    pub fn data<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => ToolFailure::Data(value),
            Err(_) => ToolFailure::Opaque,
        }
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolFailure::Message(message) => f.write_str(message),
            ToolFailure::Data(value) => f.write_str(&canonical_json(value)),
            ToolFailure::Opaque => f.write_str(UNSERIALIZABLE_PLACEHOLDER),
        }
    }
}

impl std::error::Error for ToolFailure {}

/// Normalize a handler failure into a message
pub fn failure_message(error: &anyhow::Error) -> String {
    let message = match error.downcast_ref::<ToolError>() {
        Some(tool_error) => tool_error.message.clone(),
        None => error.to_string(),
    };
    if message.is_empty() {
        "Unknown error".to_string()
    } else {
        message
    }
}

/// Convert a handler failure into a [`ToolError`]
///
/// A `ToolError` raised by the handler keeps its category and details; every
/// other failure becomes `internal`.
pub fn normalize_failure(error: anyhow::Error) -> ToolError {
    match error.downcast::<ToolError>() {
        Ok(tool_error) => tool_error,
        Err(other) => ToolError::internal(failure_message(&other)),
    }
}

/// Result of validating a handler's output against the output schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValidation {
    /// Whether the output matched
    pub valid: bool,

    /// Issues found
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
}

/// Structured outcome of one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call this result settles
    pub call_id: String,

    /// Name of the tool that handled (or was asked to handle) the call
    pub tool_name: String,

    /// Terminal outcome
    pub outcome: Outcome,

    /// Handler output on success, error message otherwise
    pub content: Value,

    /// Handler output (success only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Structured error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    /// Error category, mirrored from `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,

    /// Digest of the validated input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_digest: Option<String>,

    /// Digest of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<String>,

    /// Output validation report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_validation: Option<OutputValidation>,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// Execution duration
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(call: &ToolCall, value: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: Outcome::Success,
            content: value.clone(),
            result: Some(value),
            error: None,
            error_category: None,
            input_digest: None,
            output_digest: None,
            output_validation: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Create a failed result
    pub fn failure(call: &ToolCall, error: ToolError) -> Self {
        Self::settle_error(call, Outcome::Error, error)
    }

    /// Create a result that needs outside action before it can proceed
    pub fn action_required(call: &ToolCall, error: ToolError) -> Self {
        Self::settle_error(call, Outcome::ActionRequired, error)
    }

    fn settle_error(call: &ToolCall, outcome: Outcome, error: ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome,
            content: Value::String(error.message.clone()),
            result: None,
            error_category: Some(error.category),
            error: Some(error),
            input_digest: None,
            output_digest: None,
            output_validation: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Record the tool that actually handled the call
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    /// Record timing
    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration: Duration) -> Self {
        self.started_at = started_at;
        self.duration = duration;
        self
    }

    /// Check if this result represents success
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Check if this result represents an error
    pub fn is_error(&self) -> bool {
        self.outcome != Outcome::Success
    }

    /// Check if this result represents cancellation
    pub fn is_cancelled(&self) -> bool {
        self.error_category == Some(ErrorCategory::Cancelled)
    }

    /// Get the value if successful
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Get the error if failed
    pub fn get_error(&self) -> Option<&ToolError> {
        self.error.as_ref()
    }

    /// Consume into the success value or the error
    pub fn into_value(self) -> Result<Value, ToolError> {
        match (self.outcome, self.result, self.error) {
            (Outcome::Success, Some(value), _) => Ok(value),
            (Outcome::Success, None, _) => Ok(Value::Null),
            (_, _, Some(error)) => Err(error),
            (_, _, None) => Err(ToolError::internal("Tool settled without an error")),
        }
    }
}

// Serde helpers for Duration serialization as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}
