//! Tool handlers and their execution context
//!
//! At the engine boundary everything is untyped: a handler receives validated
//! JSON params and returns JSON. [`typed_handler`] layers serde conversion on
//! top for compile-time safety.

use super::events::EventDispatcher;
use super::result::{ToolError, ValidationIssue};
use super::runtime::ExecuteOptions;
use super::signal::AbortSignal;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Context provided to a running handler
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    /// Id of the call being served
    pub call_id: String,

    /// Name of the tool being called
    pub tool_name: String,

    /// Fires when the caller aborts or the call times out
    pub signal: AbortSignal,

    /// Effective timeout of this call
    pub timeout: Option<Duration>,

    /// Caller-supplied call metadata
    pub metadata: Value,

    /// Caller-supplied configuration
    pub configuration: Value,

    /// Emits events on the tool's hub
    pub dispatch: EventDispatcher,
}

impl ToolExecutionContext {
    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Options for calling another tool on behalf of this call
    ///
    /// The nested call shares this call's signal, metadata and configuration.
    pub fn nested_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            signal: Some(self.signal.clone()),
            timeout: None,
            dry_run: false,
            configuration: self.configuration.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Performs the work of a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run with validated params
    async fn call(&self, params: Value, ctx: ToolExecutionContext) -> anyhow::Result<Value>;
}

/// Closure-backed handler
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, params: Value, ctx: ToolExecutionContext) -> anyhow::Result<Value> {
        (self.f)(params, ctx).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Wrap a typed async closure as a handler
///
/// Params that do not deserialize into `P` fail with a `validation` error.
pub fn typed_handler<P, R, F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P, ToolExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let f = Arc::new(f);
    handler_fn(move |params: Value, ctx: ToolExecutionContext| {
        let f = f.clone();
        async move {
            let params: P = serde_json::from_value(params).map_err(|e| {
                ToolError::validation(vec![
                    ValidationIssue::new("", e.to_string()).with_code("deserialize"),
                ])
            })?;
            let output = f(params, ctx).await?;
            Ok(serde_json::to_value(output)?)
        }
    })
}

type Loader = dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn ToolHandler>>> + Send + Sync;

/// Handler resolved lazily on first call
///
/// Resolution succeeds at most once. A failed resolution is reported to the
/// call that triggered it, and the next call tries again.
pub struct DeferredHandler {
    loader: Box<Loader>,
    cell: OnceCell<Arc<dyn ToolHandler>>,
}

impl DeferredHandler {
    /// Create from a loader future factory
    pub fn new<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arc<dyn ToolHandler>>> + Send + 'static,
    {
        Self {
            loader: Box::new(move || Box::pin(loader())),
            cell: OnceCell::new(),
        }
    }

    /// Whether the handler has been resolved
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    async fn resolve(&self) -> anyhow::Result<Arc<dyn ToolHandler>> {
        let handler = self
            .cell
            .get_or_try_init(|| async {
                tracing::debug!("Resolving deferred tool handler");
                (self.loader)().await
            })
            .await?;
        Ok(handler.clone())
    }
}

#[async_trait]
impl ToolHandler for DeferredHandler {
    async fn call(&self, params: Value, ctx: ToolExecutionContext) -> anyhow::Result<Value> {
        let handler = self.resolve().await?;
        handler.call(params, ctx).await
    }
}

#[cfg(test)]
mod handler_tests {
    use super::*;
    use crate::tools::events::EventHub;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> ToolExecutionContext {
        ToolExecutionContext {
            call_id: "call-1".to_string(),
            tool_name: "test".to_string(),
            signal: AbortSignal::new(),
            timeout: None,
            metadata: Value::Null,
            configuration: Value::Null,
            dispatch: EventDispatcher::new(Arc::new(EventHub::new()), "id", "test", None),
        }
    }

    #[derive(Deserialize)]
    struct AddParams {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|params, _ctx| async move { Ok(params) });
        let out = handler.call(json!({"x": 1}), ctx()).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let handler = typed_handler(|p: AddParams, _ctx| async move { Ok(p.a + p.b) });
        assert_eq!(handler.call(json!({"a": 2, "b": 3}), ctx()).await.unwrap(), json!(5));

        let err = handler.call(json!({"a": "two"}), ctx()).await.unwrap_err();
        let tool_error = err.downcast_ref::<ToolError>().unwrap();
        assert_eq!(tool_error.category, crate::tools::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_deferred_handler_retries_after_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let deferred = DeferredHandler::new(move || {
            let a = a.clone();
            async move {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("module not ready");
                }
                Ok(handler_fn(|_params, _ctx| async { Ok(json!("loaded")) }))
            }
        });

        assert!(!deferred.is_resolved());
        let err = deferred.call(json!({}), ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "module not ready");

        assert_eq!(deferred.call(json!({}), ctx()).await.unwrap(), json!("loaded"));
        assert_eq!(deferred.call(json!({}), ctx()).await.unwrap(), json!("loaded"));
        assert!(deferred.is_resolved());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
