//! Abort signals
//!
//! An [`AbortSignal`] is advisory: it races in-flight work and wins if it fires
//! first, but it cannot stop handler code that is already running. Signals are
//! cheap to clone and all clones observe the same state.

use super::digest::canonical_json;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why a signal fired
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// A plain message
    Text(String),
    /// An error, reported by its message
    Error(String),
    /// A structured value
    Data(Value),
    /// A value that cannot be rendered
    Opaque,
}

impl AbortReason {
    /// Build a reason from an error's message
    pub fn error(error: &dyn std::error::Error) -> Self {
        AbortReason::Error(error.to_string())
    }

    /// Build a reason from a serializable value
    pub fn data<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => AbortReason::Data(value),
            Err(_) => AbortReason::Opaque,
        }
    }

    /// Message a cancelled result carries for this reason
    pub fn message(&self) -> String {
        match self {
            AbortReason::Text(text) if text.is_empty() => CANCELLED.to_string(),
            AbortReason::Text(text) => text.clone(),
            AbortReason::Error(message) => message.clone(),
            AbortReason::Data(Value::Null) => CANCELLED.to_string(),
            AbortReason::Data(Value::String(text)) => {
                AbortReason::Text(text.clone()).message()
            }
            AbortReason::Data(value) => format!("{}: {}", CANCELLED, canonical_json(value)),
            AbortReason::Opaque => CANCELLED.to_string(),
        }
    }
}

impl From<&str> for AbortReason {
    fn from(text: &str) -> Self {
        AbortReason::Text(text.to_string())
    }
}

impl From<String> for AbortReason {
    fn from(text: String) -> Self {
        AbortReason::Text(text)
    }
}

const CANCELLED: &str = "Cancelled";

/// Message for a cancellation with an optional reason
pub fn cancelled_message(reason: Option<&AbortReason>) -> String {
    reason
        .map(AbortReason::message)
        .unwrap_or_else(|| CANCELLED.to_string())
}

/// Owner side of an abort signal
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Create a controller with a fresh signal
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal this controller fires
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire without a reason
    pub fn abort(&self) {
        self.signal.fire(None);
    }

    /// Fire with a reason; only the first abort records its reason
    pub fn abort_with(&self, reason: impl Into<AbortReason>) {
        self.signal.fire(Some(reason.into()));
    }
}

/// Observer side of an abort signal
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<Option<AbortReason>>>,
    parent: Option<Box<AbortSignal>>,
}

impl AbortSignal {
    /// A signal that only fires through its controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(OnceLock::new()),
            parent: None,
        }
    }

    /// A signal that is already aborted
    pub fn aborted_with(reason: impl Into<AbortReason>) -> Self {
        let signal = Self::new();
        signal.fire(Some(reason.into()));
        signal
    }

    /// Derive a signal that fires when this one does, and can also fire alone
    pub fn child(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub(crate) fn fire(&self, reason: Option<AbortReason>) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// Whether the signal has fired
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded reason, falling back to the parent's
    pub fn reason(&self) -> Option<AbortReason> {
        match self.reason.get() {
            Some(reason) => reason.clone(),
            None => self.parent.as_ref().and_then(|parent| parent.reason()),
        }
    }

    /// Cancelled-result message for the current reason
    pub fn message(&self) -> String {
        cancelled_message(self.reason().as_ref())
    }

    /// Wait until the signal fires
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Underlying cancellation token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
