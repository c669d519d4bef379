//! Live, callable tools
//!
//! A [`ToolHandle`] binds a [`ToolDefinition`] to a handler. It owns an event
//! hub, a completion flag and, when the definition sets a concurrency limit, a
//! private limiter. Handles are cheap to clone; clones share all of that.

use super::events::{EventHub, SubscriptionId, ToolEvent, ToolEventType};
use super::handler::{ToolExecutionContext, ToolHandler, handler_fn};
use super::limiter::ConcurrencyLimiter;
use super::policy::{EffectivePolicy, RegistryPolicy};
use super::result::{ToolCall, ToolError, ToolResult, ValidationIssue};
use super::runtime::{ExecuteOptions, ToolRuntime};
use super::schema::Schema;
use super::tool::ToolDefinition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_stream::wrappers::ReceiverStream;

pub(crate) struct HandleInner {
    pub(crate) id: String,
    pub(crate) definition: Arc<ToolDefinition>,
    pub(crate) handler: Arc<dyn ToolHandler>,
    pub(crate) events: Arc<EventHub>,
    pub(crate) limiter: ConcurrencyLimiter,
    pub(crate) completed: Arc<AtomicBool>,
    pub(crate) policy: EffectivePolicy,
    pub(crate) runtime: ToolRuntime,
}

/// Lightweight description of a tool, for listings and search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    /// Handle id
    pub id: String,

    /// Tool name
    pub name: String,

    /// Description
    pub description: String,

    /// Tags
    pub tags: Vec<String>,
}

/// A callable tool
#[derive(Clone)]
pub struct ToolHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.definition.name())
            .finish()
    }
}

impl ToolHandle {
    /// Bind a definition to a handler
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        let limiter = ConcurrencyLimiter::new(definition.concurrency());
        let policy = EffectivePolicy {
            registry: None,
            tool: definition.policy().cloned(),
        };
        Self {
            inner: Arc::new(HandleInner {
                id: uuid::Uuid::new_v4().to_string(),
                definition: Arc::new(definition),
                handler,
                events: Arc::new(EventHub::new()),
                limiter,
                completed: Arc::new(AtomicBool::new(false)),
                policy,
                runtime: ToolRuntime::default(),
            }),
        }
    }

    /// Bind a definition to an async closure
    pub fn from_fn<F, Fut>(definition: ToolDefinition, f: F) -> Self
    where
        F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(definition, handler_fn(f))
    }

    /// A view of this handle governed by a registry
    ///
    /// The returned handle keeps this handle's id, hub, limiter and handler.
    pub(crate) fn governed(&self, registry: Arc<RegistryPolicy>, runtime: ToolRuntime) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(HandleInner {
                id: inner.id.clone(),
                definition: inner.definition.clone(),
                handler: inner.handler.clone(),
                events: inner.events.clone(),
                limiter: inner.limiter.clone(),
                completed: inner.completed.clone(),
                policy: EffectivePolicy {
                    registry: Some(registry),
                    tool: inner.policy.tool.clone(),
                },
                runtime,
            }),
        }
    }

    /// Use different engine defaults for this handle
    pub fn with_runtime(&self, runtime: ToolRuntime) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(HandleInner {
                id: inner.id.clone(),
                definition: inner.definition.clone(),
                handler: inner.handler.clone(),
                events: inner.events.clone(),
                limiter: inner.limiter.clone(),
                completed: inner.completed.clone(),
                policy: inner.policy.clone(),
                runtime,
            }),
        }
    }

    /// Process-unique id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Tool name
    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    /// Description
    pub fn description(&self) -> &str {
        self.inner.definition.description()
    }

    /// Definition
    pub fn definition(&self) -> &ToolDefinition {
        &self.inner.definition
    }

    /// Input schema
    pub fn input_schema(&self) -> &Arc<dyn Schema> {
        self.inner.definition.input_schema()
    }

    /// Tags
    pub fn tags(&self) -> &[String] {
        self.inner.definition.tags()
    }

    /// Metadata
    pub fn metadata(&self) -> &Map<String, Value> {
        self.inner.definition.metadata()
    }

    /// Bound handler
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        self.inner.handler.clone()
    }

    /// Private limiter (pass-through when the tool sets no limit)
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    /// Event hub
    pub fn events(&self) -> &Arc<EventHub> {
        &self.inner.events
    }

    /// Subscribe to one event type
    pub fn on<F>(&self, event_type: ToolEventType, listener: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event_type, listener)
    }

    /// Subscribe to every event
    pub fn on_any<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_any(listener)
    }

    /// Subscribe to the next event of one type
    pub fn once<F>(&self, event_type: ToolEventType, listener: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(event_type, listener)
    }

    /// Unsubscribe
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.events.off(id)
    }

    /// Drain events asynchronously
    pub fn stream(&self, capacity: usize) -> ReceiverStream<ToolEvent> {
        self.inner.events.stream(capacity)
    }

    /// Detach all listeners and mark the handle completed
    pub fn complete(&self) {
        self.inner.completed.store(true, Ordering::SeqCst);
        self.inner.events.complete();
    }

    /// Whether [`ToolHandle::complete`] was called
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Summary of this tool
    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            id: self.inner.id.clone(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            tags: self.tags().to_vec(),
        }
    }

    /// Execute a call; never fails, every outcome is a [`ToolResult`]
    pub async fn execute(&self, call: ToolCall, options: ExecuteOptions) -> ToolResult {
        self.inner
            .runtime
            .execute(&self.inner, call, options)
            .await
    }

    /// Execute with a generated call id
    pub async fn run(&self, params: Value) -> ToolResult {
        let call = ToolCall::new(self.name(), params);
        self.execute(call, ExecuteOptions::default()).await
    }

    /// Execute and return the output or the error
    pub async fn invoke(&self, params: Value, options: ExecuteOptions) -> Result<Value, ToolError> {
        let call = ToolCall::new(self.name(), params);
        self.execute(call, options).await.into_value()
    }

    /// Typed invocation: serialize params, deserialize the output
    pub async fn call<P, R>(&self, params: &P) -> Result<R, ToolError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| {
            ToolError::validation(vec![ValidationIssue::new("", e.to_string()).with_code("serialize")])
        })?;
        let output = self.invoke(params, ExecuteOptions::default()).await?;
        serde_json::from_value(output).map_err(|e| {
            ToolError::internal(format!("Failed to decode output of '{}': {}", self.name(), e))
        })
    }
}
