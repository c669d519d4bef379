//! Tool lifecycle events
//!
//! Every handle owns an [`EventHub`]. Listeners are called synchronously, in
//! subscription order, on the task that emits the event. Consumers that prefer
//! async iteration can drain a bounded [`EventHub::stream`].
//!
//! # Event sequence
//!
//! For a single call the engine emits a subset of, in order:
//!
//! - [`ToolEventKind::ExecuteStart`]
//! - [`ToolEventKind::ValidateSuccess`] or [`ToolEventKind::ValidateError`]
//! - [`ToolEventKind::PolicyDenied`]
//! - [`ToolEventKind::ExecuteSuccess`] or [`ToolEventKind::ExecuteError`]
//! - [`ToolEventKind::Settled`], always exactly once and always last

use super::result::{ErrorCategory, Outcome, ValidationIssue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEventKind {
    /// A call entered the engine
    ExecuteStart,

    /// Arguments passed the input schema
    ValidateSuccess,

    /// Arguments failed the input schema
    ValidateError {
        /// Issues reported by the schema
        issues: Vec<ValidationIssue>,
        /// Repair hints from diagnostics, if any
        #[serde(default)]
        hints: Vec<String>,
    },

    /// Policy refused the call
    PolicyDenied {
        /// Reason given by the deciding hook
        reason: String,
        /// Alternate status, e.g. `needs_approval`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// The handler produced a value
    ExecuteSuccess {
        /// Handler wall-clock time in milliseconds
        duration_ms: u64,
    },

    /// Execution failed after validation and policy
    ExecuteError {
        /// Failure category
        category: ErrorCategory,
        /// Failure message
        message: String,
    },

    /// Terminal event of every call
    Settled {
        /// Final outcome
        outcome: Outcome,
    },

    /// A composed tool started one of its steps
    StepStart {
        /// Zero-based step index
        index: usize,
        /// Step tool name
        name: String,
    },

    /// A composed tool finished one of its steps
    StepComplete {
        /// Zero-based step index
        index: usize,
        /// Step tool name
        name: String,
    },

    /// A step of a composed tool failed
    StepError {
        /// Zero-based step index
        index: usize,
        /// Step tool name
        name: String,
        /// Failure message
        message: String,
    },

    /// A retry wrapper is about to wait and try again
    Retry {
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Wait before the next attempt
        delay_ms: u64,
        /// Failure message of the attempt
        message: String,
    },

    /// Emitted by a handler through its dispatcher
    Custom {
        /// Event name chosen by the handler
        name: String,
        /// Payload
        #[serde(default)]
        data: Value,
    },

    /// A tool is about to be added to a registry
    Registering,

    /// A tool was added to a registry
    Registered,

    /// A tool was removed from a registry
    Unregistered,
}

/// Fieldless discriminant of [`ToolEventKind`], used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEventType {
    ExecuteStart,
    ValidateSuccess,
    ValidateError,
    PolicyDenied,
    ExecuteSuccess,
    ExecuteError,
    Settled,
    StepStart,
    StepComplete,
    StepError,
    Retry,
    Custom,
    Registering,
    Registered,
    Unregistered,
}

impl ToolEventKind {
    /// Discriminant of this event
    pub fn event_type(&self) -> ToolEventType {
        match self {
            ToolEventKind::ExecuteStart => ToolEventType::ExecuteStart,
            ToolEventKind::ValidateSuccess => ToolEventType::ValidateSuccess,
            ToolEventKind::ValidateError { .. } => ToolEventType::ValidateError,
            ToolEventKind::PolicyDenied { .. } => ToolEventType::PolicyDenied,
            ToolEventKind::ExecuteSuccess { .. } => ToolEventType::ExecuteSuccess,
            ToolEventKind::ExecuteError { .. } => ToolEventType::ExecuteError,
            ToolEventKind::Settled { .. } => ToolEventType::Settled,
            ToolEventKind::StepStart { .. } => ToolEventType::StepStart,
            ToolEventKind::StepComplete { .. } => ToolEventType::StepComplete,
            ToolEventKind::StepError { .. } => ToolEventType::StepError,
            ToolEventKind::Retry { .. } => ToolEventType::Retry,
            ToolEventKind::Custom { .. } => ToolEventType::Custom,
            ToolEventKind::Registering => ToolEventType::Registering,
            ToolEventKind::Registered => ToolEventType::Registered,
            ToolEventKind::Unregistered => ToolEventType::Unregistered,
        }
    }
}

/// An event with the tool and call it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Id of the emitting handle
    pub tool_id: String,

    /// Name of the emitting handle
    pub tool_name: String,

    /// Call the event belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    /// When the event was emitted
    pub timestamp: DateTime<Utc>,

    /// What happened
    #[serde(flatten)]
    pub kind: ToolEventKind,
}

impl ToolEvent {
    /// Create an event stamped now
    pub fn new(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        call_id: Option<String>,
        kind: ToolEventKind,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            call_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Discriminant of this event
    pub fn event_type(&self) -> ToolEventType {
        self.kind.event_type()
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&ToolEvent) + Send + Sync>;

/// Handle returned by subscriptions, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    filter: Option<ToolEventType>,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct HubState {
    subscriptions: Vec<Subscription>,
    streams: Vec<mpsc::Sender<ToolEvent>>,
}

/// Synchronous publish/subscribe channel for [`ToolEvent`]s
#[derive(Default)]
pub struct EventHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(&self, filter: Option<ToolEventType>, once: bool, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().subscriptions.push(Subscription {
            id,
            filter,
            once,
            listener,
        });
        id
    }

    /// Listen to every event of one type
    pub fn on<F>(&self, event_type: ToolEventType, listener: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(event_type), false, Arc::new(listener))
    }

    /// Listen to every event
    pub fn on_any<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, false, Arc::new(listener))
    }

    /// Listen to the next event of one type only
    pub fn once<F>(&self, event_type: ToolEventType, listener: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(event_type), true, Arc::new(listener))
    }

    /// Remove a subscription; returns whether it was still attached
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|subscription| subscription.id != id);
        state.subscriptions.len() != before
    }

    /// Receive events through a bounded channel
    ///
    /// Events are dropped for this stream while its buffer is full. The stream
    /// ends when the hub completes.
    pub fn stream(&self, capacity: usize) -> ReceiverStream<ToolEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.lock().streams.push(tx);
        ReceiverStream::new(rx)
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Detach every listener and end every stream
    pub fn complete(&self) {
        let mut state = self.lock();
        state.subscriptions.clear();
        state.streams.clear();
    }

    /// Deliver an event to matching listeners and streams
    pub fn emit(&self, event: &ToolEvent) {
        let event_type = event.event_type();
        let listeners: Vec<Listener> = {
            let mut state = self.lock();
            let listeners = state
                .subscriptions
                .iter()
                .filter(|subscription| subscription.filter.is_none_or(|f| f == event_type))
                .map(|subscription| subscription.listener.clone())
                .collect();
            state.subscriptions.retain(|subscription| {
                !(subscription.once && subscription.filter.is_none_or(|f| f == event_type))
            });
            state.streams.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(event = ?event_type, "Event stream full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
            listeners
        };

        // Listeners run outside the lock so they may subscribe or emit
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(
                    tool = %event.tool_name,
                    event = ?event_type,
                    "Event listener panicked"
                );
            }
        }
    }
}

/// Emits events on behalf of a running call
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    hub: Arc<EventHub>,
    tool_id: String,
    tool_name: String,
    call_id: Option<String>,
}

impl EventDispatcher {
    /// Create a dispatcher bound to a hub and a call
    pub fn new(
        hub: Arc<EventHub>,
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        call_id: Option<String>,
    ) -> Self {
        Self {
            hub,
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            call_id,
        }
    }

    /// Emit an event of the given kind
    pub fn emit(&self, kind: ToolEventKind) {
        let event = ToolEvent::new(
            self.tool_id.clone(),
            self.tool_name.clone(),
            self.call_id.clone(),
            kind,
        );
        self.hub.emit(&event);
    }

    /// Emit a custom event
    pub fn custom(&self, name: impl Into<String>, data: Value) {
        self.emit(ToolEventKind::Custom {
            name: name.into(),
            data,
        });
    }

    /// Call the dispatcher belongs to
    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }
}
