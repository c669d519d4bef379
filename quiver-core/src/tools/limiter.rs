//! Bounded admission gate
//!
//! Backed by `tokio::sync::Semaphore`, which hands out permits in FIFO order:
//! releasing a slot always wakes the oldest queued waiter first.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct LimiterInner {
    limit: usize,
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    waiting: AtomicUsize,
}

/// Limits how many tasks run at once
///
/// A limiter without a usable limit (absent, zero, negative or non-finite) is a
/// pass-through. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyLimiter {
    inner: Option<Arc<LimiterInner>>,
}

/// A held slot; dropping it frees the slot
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: Option<OwnedSemaphorePermit>,
    inner: Option<Arc<LimiterInner>>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        if let Some(ref inner) = self.inner {
            inner.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Counts a pending acquire; the count drops even if the acquire is abandoned
struct Queued<'a>(&'a LimiterInner);

impl<'a> Queued<'a> {
    fn enter(inner: &'a LimiterInner) -> Self {
        inner.waiting.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter; `None` and `Some(0)` yield a pass-through
    pub fn new(limit: Option<usize>) -> Self {
        match limit {
            Some(limit) if limit > 0 => Self {
                inner: Some(Arc::new(LimiterInner {
                    limit,
                    semaphore: Arc::new(Semaphore::new(limit)),
                    active: AtomicUsize::new(0),
                    waiting: AtomicUsize::new(0),
                })),
            },
            _ => Self::unlimited(),
        }
    }

    /// A pass-through limiter
    pub fn unlimited() -> Self {
        Self { inner: None }
    }

    /// Create a limiter from a float limit, flooring fractional values
    pub fn from_f64(limit: f64) -> Self {
        if !limit.is_finite() || limit < 1.0 {
            return Self::unlimited();
        }
        Self::new(Some(limit.floor() as usize))
    }

    /// Create a limiter from a loosely typed value, e.g. tool metadata
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => number
                .as_f64()
                .map(Self::from_f64)
                .unwrap_or_default(),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map(Self::from_f64)
                .unwrap_or_default(),
            _ => Self::unlimited(),
        }
    }

    /// Configured limit, if any
    pub fn limit(&self) -> Option<usize> {
        self.inner.as_ref().map(|inner| inner.limit)
    }

    /// Whether this limiter enforces anything
    pub fn is_limited(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of tasks holding a slot
    pub fn active(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| inner.active.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of tasks queued for a slot
    pub fn waiting(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| inner.waiting.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Wait for a slot
    pub async fn acquire(&self) -> LimiterPermit {
        let Some(ref inner) = self.inner else {
            return LimiterPermit {
                _permit: None,
                inner: None,
            };
        };

        if inner.semaphore.available_permits() == 0 {
            tracing::debug!(
                limit = inner.limit,
                waiting = inner.waiting.load(Ordering::SeqCst) + 1,
                "Concurrency limit reached, queueing"
            );
        }

        let queued = Queued::enter(inner);
        let permit = inner.semaphore.clone().acquire_owned().await.ok();
        drop(queued);
        inner.active.fetch_add(1, Ordering::SeqCst);

        LimiterPermit {
            _permit: permit,
            inner: Some(inner.clone()),
        }
    }

    /// Run a task once a slot is free
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        task.await
    }
}
