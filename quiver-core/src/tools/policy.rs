//! Policy engine for tool execution
//!
//! A call passes through up to three gates before its handler runs:
//!
//! 1. Built-in risk checks from the registry's [`PolicyConfig`]
//! 2. The registry-supplied [`PolicyHook`]
//! 3. The tool-supplied [`PolicyHook`]
//!
//! The first explicit deny wins and skips the rest. No hooks means allow.
//! After-hooks run tool first, then registry, and can never fail a call.

use super::result::{ToolCall, ToolResult};
use crate::config::PolicyConfig;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Status that turns a denial into an `action_required` outcome
pub const NEEDS_APPROVAL: &str = "needs_approval";

/// Decision returned by a before-hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Let the call proceed
    Allow,
    /// Refuse the call
    Deny {
        /// Why the call was refused
        reason: String,
        /// Alternate status, e.g. [`NEEDS_APPROVAL`]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
}

impl PolicyDecision {
    /// Refuse with a reason
    pub fn deny(reason: impl Into<String>) -> Self {
        PolicyDecision::Deny {
            reason: reason.into(),
            status: None,
        }
    }

    /// Refuse until someone approves the call
    pub fn needs_approval(reason: impl Into<String>) -> Self {
        PolicyDecision::Deny {
            reason: reason.into(),
            status: Some(NEEDS_APPROVAL.to_string()),
        }
    }

    /// Whether the call may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Whether the denial asks for approval
    pub fn requires_approval(&self) -> bool {
        matches!(
            self,
            PolicyDecision::Deny { status: Some(status), .. } if status == NEEDS_APPROVAL
        )
    }
}

impl From<bool> for PolicyDecision {
    fn from(allowed: bool) -> Self {
        if allowed {
            PolicyDecision::Allow
        } else {
            PolicyDecision::deny("Denied by policy")
        }
    }
}

/// Everything a hook may inspect
#[derive(Debug, Clone, Serialize)]
pub struct PolicyContext {
    /// Tool being called
    pub tool_name: String,

    /// The original call
    pub tool_call: ToolCall,

    /// Validated parameters
    pub params: Value,

    /// Tool tags
    pub tags: Vec<String>,

    /// Tool metadata
    pub metadata: Map<String, Value>,

    /// Caller-supplied configuration for this execution
    pub configuration: Value,
}

/// Before/after hooks around tool execution
#[async_trait]
pub trait PolicyHook: Send + Sync {
    /// Decide whether the call may run
    async fn before_execute(&self, ctx: &PolicyContext) -> anyhow::Result<PolicyDecision> {
        let _ = ctx;
        Ok(PolicyDecision::Allow)
    }

    /// Observe the settled result
    async fn after_execute(&self, ctx: &PolicyContext, result: &ToolResult) -> anyhow::Result<()> {
        let _ = (ctx, result);
        Ok(())
    }
}

type BeforeFn = dyn Fn(&PolicyContext) -> anyhow::Result<PolicyDecision> + Send + Sync;
type AfterFn = dyn Fn(&PolicyContext, &ToolResult) -> anyhow::Result<()> + Send + Sync;

/// Closure-backed [`PolicyHook`]
#[derive(Default, Clone)]
pub struct PolicyHooks {
    before: Option<Arc<BeforeFn>>,
    after: Option<Arc<AfterFn>>,
}

impl std::fmt::Debug for PolicyHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyHooks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

impl PolicyHooks {
    /// Create an empty hook set (allows everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the before-hook
    pub fn before<F, D>(mut self, hook: F) -> Self
    where
        F: Fn(&PolicyContext) -> D + Send + Sync + 'static,
        D: Into<PolicyDecision>,
    {
        self.before = Some(Arc::new(move |ctx: &PolicyContext| Ok(hook(ctx).into())));
        self
    }

    /// Set a fallible before-hook
    pub fn try_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PolicyContext) -> anyhow::Result<PolicyDecision> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    /// Set the after-hook
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PolicyContext, &ToolResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(hook));
        self
    }

    /// Finish as a shareable hook
    pub fn build(self) -> Arc<dyn PolicyHook> {
        Arc::new(self)
    }
}

#[async_trait]
impl PolicyHook for PolicyHooks {
    async fn before_execute(&self, ctx: &PolicyContext) -> anyhow::Result<PolicyDecision> {
        match self.before {
            Some(ref hook) => hook(ctx),
            None => Ok(PolicyDecision::Allow),
        }
    }

    async fn after_execute(&self, ctx: &PolicyContext, result: &ToolResult) -> anyhow::Result<()> {
        match self.after {
            Some(ref hook) => hook(ctx, result),
            None => Ok(()),
        }
    }
}

/// Risk classification of a tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// The tool changes state
    pub mutates: bool,

    /// The tool is flagged as dangerous
    pub dangerous: bool,
}

impl RiskProfile {
    /// Classify from metadata flags, falling back to tag names
    ///
    /// Metadata keys: `mutates`, `readOnly`, `dangerous`.
    /// Tags: `mutating`, `readonly`, `dangerous`.
    pub fn classify(metadata: &Map<String, Value>, tags: &[String]) -> Self {
        let has_tag = |name: &str| tags.iter().any(|tag| tag.eq_ignore_ascii_case(name));

        let mutates = match (
            metadata.get("mutates").and_then(Value::as_bool),
            metadata.get("readOnly").and_then(Value::as_bool),
        ) {
            (Some(mutates), _) => mutates,
            (None, Some(read_only)) => !read_only,
            (None, None) => has_tag("mutating") && !has_tag("readonly"),
        };

        let dangerous = metadata
            .get("dangerous")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| has_tag("dangerous"));

        Self { mutates, dangerous }
    }
}

impl PolicyConfig {
    /// Allow everything, including dangerous tools
    pub fn permissive() -> Self {
        Self {
            read_only: false,
            allow_mutation: true,
            allow_dangerous: true,
        }
    }

    /// Deny every mutating or dangerous tool
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            allow_mutation: false,
            allow_dangerous: false,
        }
    }

    /// Check a tool's risk profile against these flags
    pub fn check(&self, tool_name: &str, risk: RiskProfile) -> PolicyDecision {
        if risk.mutates && self.read_only {
            return PolicyDecision::deny(format!(
                "Tool '{}' mutates state and the registry is read-only",
                tool_name
            ));
        }
        if risk.mutates && !self.allow_mutation {
            return PolicyDecision::deny(format!(
                "Tool '{}' mutates state and mutation is disabled",
                tool_name
            ));
        }
        if risk.dangerous && !self.allow_dangerous {
            return PolicyDecision::deny(format!(
                "Tool '{}' is marked dangerous and dangerous tools are not allowed",
                tool_name
            ));
        }
        PolicyDecision::Allow
    }
}

/// Registry-wide policy: built-in risk flags plus an optional hook
#[derive(Clone, Default)]
pub struct RegistryPolicy {
    /// Built-in risk flags
    pub config: PolicyConfig,

    /// Registry-supplied hook
    pub hook: Option<Arc<dyn PolicyHook>>,
}

impl std::fmt::Debug for RegistryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryPolicy")
            .field("config", &self.config)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl RegistryPolicy {
    /// Create from flags
    pub fn new(config: PolicyConfig) -> Self {
        Self { config, hook: None }
    }

    /// Attach a registry-wide hook
    pub fn with_hook(mut self, hook: Arc<dyn PolicyHook>) -> Self {
        self.hook = Some(hook);
        self
    }
}

/// Registry and tool policy combined for one handle
#[derive(Clone, Default)]
pub(crate) struct EffectivePolicy {
    pub registry: Option<Arc<RegistryPolicy>>,
    pub tool: Option<Arc<dyn PolicyHook>>,
}

impl EffectivePolicy {
    pub(crate) async fn before_execute(&self, ctx: &PolicyContext) -> PolicyDecision {
        if let Some(ref registry) = self.registry {
            let risk = RiskProfile::classify(&ctx.metadata, &ctx.tags);
            let decision = registry.config.check(&ctx.tool_name, risk);
            if !decision.is_allowed() {
                return decision;
            }
            if let Some(ref hook) = registry.hook {
                let decision = run_before(hook.as_ref(), ctx, "registry").await;
                if !decision.is_allowed() {
                    return decision;
                }
            }
        }

        match self.tool {
            Some(ref hook) => run_before(hook.as_ref(), ctx, "tool").await,
            None => PolicyDecision::Allow,
        }
    }

    pub(crate) async fn after_execute(&self, ctx: &PolicyContext, result: &ToolResult) {
        if let Some(ref hook) = self.tool {
            run_after(hook.as_ref(), ctx, result, "tool").await;
        }
        if let Some(hook) = self.registry.as_ref().and_then(|r| r.hook.as_ref()) {
            run_after(hook.as_ref(), ctx, result, "registry").await;
        }
    }
}

async fn run_before(hook: &dyn PolicyHook, ctx: &PolicyContext, level: &str) -> PolicyDecision {
    match AssertUnwindSafe(hook.before_execute(ctx)).catch_unwind().await {
        Ok(Ok(decision)) => decision,
        Ok(Err(error)) => {
            tracing::warn!(tool = %ctx.tool_name, level, error = %error, "Policy hook failed");
            PolicyDecision::deny(format!("Policy hook failed: {}", error))
        }
        Err(_) => {
            tracing::warn!(tool = %ctx.tool_name, level, "Policy hook panicked");
            PolicyDecision::deny("Policy hook failed: panicked")
        }
    }
}

async fn run_after(hook: &dyn PolicyHook, ctx: &PolicyContext, result: &ToolResult, level: &str) {
    match AssertUnwindSafe(hook.after_execute(ctx, result)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::warn!(tool = %ctx.tool_name, level, error = %error, "After-execute hook failed");
        }
        Err(_) => {
            tracing::warn!(tool = %ctx.tool_name, level, "After-execute hook panicked");
        }
    }
}
