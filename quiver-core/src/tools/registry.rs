//! Tool Registry for registration, lookup, batch execution and discovery
//!
//! The `ToolRegistry` provides:
//! - Two indices over the same handles: by id (exact) and by name (last
//!   registration wins)
//! - Registry-wide policy applied to every registered handle
//! - Batch execution with parallel/sequential modes, a batch-level
//!   concurrency limit, fail-fast aborts and a session budget
//! - Event bubbling: every handle event is re-emitted on the registry hub
//! - Filtering and relevance-ranked search
//!
//! # Example
//!
//! ```rust,ignore
//! use quiver_core::prelude::*;
//!
//! let registry = ToolRegistry::new().with_policy(PolicyConfig::read_only());
//! registry.register(definition, handler)?;
//!
//! let results = registry
//!     .execute(vec![ToolCall::new("search", json!({"q": "rust"}))], BatchOptions::default())
//!     .await;
//! ```

use super::budget::{BudgetGuard, BudgetUsage};
use super::events::{EventHub, SubscriptionId, ToolEvent, ToolEventKind};
use super::handle::{ToolHandle, ToolSummary};
use super::handler::ToolHandler;
use super::limiter::ConcurrencyLimiter;
use super::policy::{PolicyHook, RegistryPolicy};
use super::result::{ToolCall, ToolError, ToolResult};
use super::runtime::{ExecuteOptions, ToolRuntime};
use super::signal::{AbortReason, AbortSignal};
use super::tool::{ToolDefinition, ToolRecord};
use crate::config::{BatchConfig, BudgetConfig, PolicyConfig, QuiverConfig, SearchConfig};
use crate::error::{QuiverError, Result};
use crate::search::{Embedder, SearchEngine, SearchHit, TextMatcher, ToolQueryCriteria, ToolSearchOptions};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// How a batch schedules its calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// Start every call at once (subject to the batch limit)
    #[default]
    Parallel,
    /// Run calls one after another, in order
    Sequential,
}

/// What a batch does after a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorMode {
    /// Run every call regardless
    #[default]
    Continue,
    /// Abort the calls that have not finished; they settle as cancelled
    FailFast,
}

/// Options for [`ToolRegistry::execute`]
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Scheduling mode; registry default when unset
    pub mode: Option<BatchMode>,

    /// Error mode; registry default when unset
    pub error_mode: Option<ErrorMode>,

    /// Batch-level concurrency limit; registry default when unset
    pub concurrency: Option<usize>,

    /// Caller abort signal for the whole batch
    pub signal: Option<AbortSignal>,

    /// Per-call timeout
    pub timeout: Option<Duration>,

    /// Configuration passed to every call
    pub configuration: Value,
}

impl BatchOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Run calls one after another
    pub fn sequential(mut self) -> Self {
        self.mode = Some(BatchMode::Sequential);
        self
    }

    /// Run calls concurrently
    pub fn parallel(mut self) -> Self {
        self.mode = Some(BatchMode::Parallel);
        self
    }

    /// Abort the rest of the batch after the first failure
    pub fn fail_fast(mut self) -> Self {
        self.error_mode = Some(ErrorMode::FailFast);
        self
    }

    /// Limit concurrent calls in this batch
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Set abort signal
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Set per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set configuration
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }
}

struct Entry {
    seq: u64,
    handle: ToolHandle,
    forward: SubscriptionId,
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, Entry>,
    by_name: HashMap<String, Vec<String>>,
    next_seq: u64,
}

impl RegistryState {
    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.by_id.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    fn remove_name_index(&mut self, name: &str, id: &str) {
        if let Some(ids) = self.by_name.get_mut(name) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.by_name.remove(name);
            }
        }
    }
}

/// In-memory collection of tool handles
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    policy: Arc<RegistryPolicy>,
    runtime: ToolRuntime,
    budget: BudgetGuard,
    batch: BatchConfig,
    search: SearchEngine,
    events: Arc<EventHub>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry with default policy and no budget
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            policy: Arc::new(RegistryPolicy::default()),
            runtime: ToolRuntime::default(),
            budget: BudgetGuard::new(BudgetConfig::default()),
            batch: BatchConfig::default(),
            search: SearchEngine::new(SearchConfig::default()),
            events: Arc::new(EventHub::new()),
        }
    }

    /// Create a registry from configuration
    pub fn from_config(config: &QuiverConfig) -> Self {
        Self {
            policy: Arc::new(RegistryPolicy::new(config.policy)),
            runtime: ToolRuntime::from_config(&config.execution),
            budget: BudgetGuard::new(config.budget),
            batch: config.batch,
            search: SearchEngine::new(config.search),
            ..Self::new()
        }
    }

    /// Set built-in risk flags (call before registering tools)
    pub fn with_policy(mut self, config: PolicyConfig) -> Self {
        let hook = self.policy.hook.clone();
        self.policy = Arc::new(RegistryPolicy { config, hook });
        self
    }

    /// Set the registry-wide hook (call before registering tools)
    pub fn with_policy_hook(mut self, hook: Arc<dyn PolicyHook>) -> Self {
        let config = self.policy.config;
        self.policy = Arc::new(RegistryPolicy {
            config,
            hook: Some(hook),
        });
        self
    }

    /// Set engine defaults (call before registering tools)
    pub fn with_runtime(mut self, runtime: ToolRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set a session budget; its clock starts now
    pub fn with_budget(mut self, config: BudgetConfig) -> Self {
        self.budget = BudgetGuard::new(config);
        self
    }

    /// Set batch defaults
    pub fn with_batch_defaults(mut self, config: BatchConfig) -> Self {
        self.batch = config;
        self
    }

    /// Configure the embedder used by search
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.search = self.search.with_embedder(embedder);
        self
    }

    /// Replace the fuzzy text matcher used by search
    pub fn with_text_matcher(mut self, matcher: Arc<dyn TextMatcher>) -> Self {
        self.search = self.search.with_text_matcher(matcher);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, handle: &ToolHandle, kind: ToolEventKind) {
        self.events
            .emit(&ToolEvent::new(handle.id(), handle.name(), None, kind));
    }

    /// Registry-level event hub; handle events bubble up here
    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Build a handle from a definition and register it
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolHandle {
        self.register_handle(ToolHandle::new(definition, handler))
    }

    /// Register an existing handle (e.g. a composed tool)
    ///
    /// The returned handle shares the original's id and hub but is governed by
    /// this registry's policy and runtime.
    pub fn register_handle(&self, handle: ToolHandle) -> ToolHandle {
        self.emit(&handle, ToolEventKind::Registering);

        let governed = handle.governed(self.policy.clone(), self.runtime.clone());
        let registry_events = Arc::downgrade(&self.events);
        let forward = governed.on_any(move |event| {
            if let Some(hub) = registry_events.upgrade() {
                hub.emit(event);
            }
        });

        let replaced = {
            let mut state = self.write();
            let seq = state.next_seq;
            state.next_seq += 1;

            let replaced = state.by_id.remove(governed.id());
            if let Some(ref old) = replaced {
                state.remove_name_index(old.handle.name(), old.handle.id());
            }
            state
                .by_name
                .entry(governed.name().to_string())
                .or_default()
                .push(governed.id().to_string());
            state.by_id.insert(
                governed.id().to_string(),
                Entry {
                    seq,
                    handle: governed.clone(),
                    forward,
                },
            );
            replaced
        };

        if let Some(old) = replaced {
            old.handle.off(old.forward);
        }
        self.search.forget(governed.id());

        tracing::info!(tool = %governed.name(), id = %governed.id(), "Registered tool");
        self.emit(&governed, ToolEventKind::Registered);
        governed
    }

    /// Remove a handle by id
    pub fn unregister(&self, id: &str) -> Option<ToolHandle> {
        let removed = {
            let mut state = self.write();
            let removed = state.by_id.remove(id);
            if let Some(ref entry) = removed {
                state.remove_name_index(entry.handle.name(), id);
            }
            removed
        }?;

        removed.handle.off(removed.forward);
        self.search.forget(id);
        tracing::info!(tool = %removed.handle.name(), id = %id, "Unregistered tool");
        self.emit(&removed.handle, ToolEventKind::Unregistered);
        Some(removed.handle)
    }

    /// Look up by id, then by name (most recent registration wins)
    pub fn get_tool(&self, name_or_id: &str) -> Option<ToolHandle> {
        let state = self.read();
        if let Some(entry) = state.by_id.get(name_or_id) {
            return Some(entry.handle.clone());
        }
        state
            .by_name
            .get(name_or_id)
            .and_then(|ids| ids.last())
            .and_then(|id| state.by_id.get(id))
            .map(|entry| entry.handle.clone())
    }

    /// Check whether a name or id resolves
    pub fn contains(&self, name_or_id: &str) -> bool {
        self.get_tool(name_or_id).is_some()
    }

    /// Names (or ids) from the list that do not resolve
    pub fn get_missing_tools<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// Whether every name (or id) resolves
    pub fn has_all_tools<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.get_missing_tools(names).is_empty()
    }

    /// Every handle, in registration order
    pub fn handles(&self) -> Vec<ToolHandle> {
        self.read()
            .ordered()
            .into_iter()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Distinct tool names, in first-registration order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.read().ordered() {
            let name = entry.handle.name();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summaries of every handle, in registration order
    pub fn list(&self) -> Vec<ToolSummary> {
        self.handles().iter().map(ToolHandle::summary).collect()
    }

    /// Current budget consumption
    pub fn budget_usage(&self) -> BudgetUsage {
        self.budget.usage()
    }

    /// Start a new budget session
    pub fn reset_budget(&self) {
        self.budget.reset();
    }

    /// Execute a single call
    pub async fn execute_call(&self, call: ToolCall, options: ExecuteOptions) -> ToolResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        let Some(handle) = self.get_tool(&call.name) else {
            tracing::debug!(tool = %call.name, call_id = %call.id, "Tool not found");
            return ToolResult::failure(&call, ToolError::not_found(&call.name))
                .with_timing(started_at, clock.elapsed());
        };

        let aborted = options
            .signal
            .as_ref()
            .map(AbortSignal::is_aborted)
            .unwrap_or(false);
        if !aborted {
            if let Err(message) = self.budget.try_admit() {
                tracing::warn!(tool = %call.name, call_id = %call.id, "{}", message);
                return ToolResult::failure(&call, ToolError::budget_exceeded(message))
                    .with_tool_name(handle.name())
                    .with_timing(started_at, clock.elapsed());
            }
        }

        handle.execute(call, options).await
    }

    /// Execute a batch; results come back in call order, one per call
    pub async fn execute(&self, calls: Vec<ToolCall>, options: BatchOptions) -> Vec<ToolResult> {
        let mode = options.mode.unwrap_or(self.batch.mode);
        let error_mode = options.error_mode.unwrap_or(self.batch.error_mode);
        let limiter = ConcurrencyLimiter::new(options.concurrency.or(self.batch.concurrency));
        let batch_signal = options
            .signal
            .as_ref()
            .map(AbortSignal::child)
            .unwrap_or_default();

        tracing::debug!(
            calls = calls.len(),
            mode = ?mode,
            error_mode = ?error_mode,
            "Executing tool batch"
        );

        let run = |call: ToolCall| {
            let limiter = limiter.clone();
            let batch_signal = batch_signal.clone();
            let call_options = ExecuteOptions {
                signal: Some(batch_signal.clone()),
                timeout: options.timeout,
                dry_run: false,
                configuration: options.configuration.clone(),
                metadata: Value::Null,
            };
            async move {
                let result = limiter.run(self.execute_call(call, call_options)).await;
                if error_mode == ErrorMode::FailFast && result.is_error() && !batch_signal.is_aborted() {
                    tracing::debug!(tool = %result.tool_name, "Batch failed fast");
                    batch_signal.fire(Some(AbortReason::Text(format!(
                        "Batch aborted: '{}' failed",
                        result.tool_name
                    ))));
                }
                result
            }
        };

        match mode {
            BatchMode::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(run(call).await);
                }
                results
            }
            BatchMode::Parallel => futures::future::join_all(calls.into_iter().map(run)).await,
        }
    }

    /// Serializable form of every handle, in registration order
    pub fn to_records(&self) -> Vec<ToolRecord> {
        self.handles()
            .iter()
            .map(|handle| handle.definition().to_record())
            .collect()
    }

    /// Register definitions from records, re-attaching handlers via `resolver`
    ///
    /// # Errors
    ///
    /// Fails on the first record whose definition is invalid or whose handler
    /// the resolver cannot provide. Records before it stay registered.
    pub fn load_records<F>(&self, records: Vec<ToolRecord>, resolver: F) -> Result<Vec<ToolHandle>>
    where
        F: Fn(&ToolRecord) -> Option<Arc<dyn ToolHandler>>,
    {
        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let handler = resolver(&record).ok_or_else(|| {
                QuiverError::Registry(format!("no handler resolved for tool '{}'", record.name))
            })?;
            let definition = ToolDefinition::from_record(record)?;
            handles.push(self.register(definition, handler));
        }
        Ok(handles)
    }

    /// Build a default registry from records
    pub fn from_records<F>(records: Vec<ToolRecord>, resolver: F) -> Result<Self>
    where
        F: Fn(&ToolRecord) -> Option<Arc<dyn ToolHandler>>,
    {
        let registry = Self::new();
        registry.load_records(records, resolver)?;
        Ok(registry)
    }

    /// Filter handles by criteria, in registration order
    pub fn query(&self, criteria: &ToolQueryCriteria) -> Vec<ToolHandle> {
        self.search.query(&self.handles(), criteria)
    }

    /// Rank handles against search options
    pub async fn search(&self, options: &ToolSearchOptions) -> Vec<SearchHit> {
        self.search.search(&self.handles(), options).await
    }

    /// Drop every cached tool embedding
    pub fn reindex(&self) {
        self.search.reindex();
    }

    /// Drop the cached embeddings of one tool
    pub fn reindex_tool(&self, id: &str) {
        self.search.forget(id);
    }
}
