//! Retry with backoff

use super::{CompositionOptions, passthrough_builder};
use crate::error::{QuiverError, Result};
use crate::tools::{ToolError, ToolEventKind, ToolHandle};
use std::sync::Arc;
use std::time::Duration;

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same delay every time
    #[default]
    Fixed,
    /// Delay doubles after each failed attempt
    Exponential,
}

type ShouldRetry = Arc<dyn Fn(&ToolError, u32) -> bool + Send + Sync>;
type OnRetry = Arc<dyn Fn(&ToolError, u32, Duration) + Send + Sync>;

/// Retry configuration
#[derive(Clone)]
pub struct RetryOptions {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Base delay between attempts
    pub delay: Duration,

    /// Delay growth
    pub backoff: Backoff,

    /// Upper bound for any single delay
    pub max_delay: Option<Duration>,

    /// Veto further attempts; receives the error and the failed attempt number
    pub should_retry: Option<ShouldRetry>,

    /// Observe a retry before its wait
    pub on_retry: Option<OnRetry>,

    /// Name, description and tags of the composed tool
    pub composition: CompositionOptions,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_delay: None,
            should_retry: None,
            on_retry: None,
            composition: CompositionOptions::default(),
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryOptions {
    /// Retry up to `attempts` times in total
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// Builder: set base delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Builder: double the delay after each attempt
    pub fn exponential(mut self) -> Self {
        self.backoff = Backoff::Exponential;
        self
    }

    /// Builder: cap the delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Builder: decide per failure whether to keep trying
    pub fn with_should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&ToolError, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(f));
        self
    }

    /// Builder: observe each retry
    pub fn with_on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&ToolError, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Builder: name and tag the composed tool
    pub fn with_composition(mut self, composition: CompositionOptions) -> Self {
        self.composition = composition;
        self
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor)
            }
        };
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Re-invoke a tool until it succeeds or attempts run out
///
/// The last error is returned unchanged. A `should_retry` veto returns the
/// error that triggered it. An abort while waiting fails at once as
/// `cancelled`.
pub fn retry(tool: ToolHandle, options: RetryOptions) -> Result<ToolHandle> {
    if options.attempts == 0 {
        return Err(QuiverError::Composition(
            "retry requires at least one attempt".to_string(),
        ));
    }

    let definition = passthrough_builder(&tool, &options.composition, format!("retry({})", tool.name())).build()?;
    let options = Arc::new(options);

    Ok(ToolHandle::from_fn(definition, move |params, ctx| {
        let tool = tool.clone();
        let options = options.clone();
        async move {
            let mut attempt = 1u32;
            loop {
                let error = match tool.invoke(params.clone(), ctx.nested_options()).await {
                    Ok(output) => return Ok(output),
                    Err(error) => error,
                };

                if attempt >= options.attempts || ctx.is_cancelled() {
                    return Err(error.into());
                }
                if let Some(ref should_retry) = options.should_retry {
                    if !should_retry(&error, attempt) {
                        tracing::debug!(tool = %tool.name(), attempt, "Retry vetoed");
                        return Err(error.into());
                    }
                }

                let delay = options.delay_for_attempt(attempt);
                if let Some(ref on_retry) = options.on_retry {
                    on_retry(&error, attempt, delay);
                }
                tracing::debug!(
                    tool = %tool.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying tool"
                );
                ctx.dispatch.emit(ToolEventKind::Retry {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    message: error.message.clone(),
                });

                tokio::select! {
                    biased;
                    _ = ctx.signal.cancelled() => {
                        return Err(ToolError::cancelled(ctx.signal.message()).into());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }))
}
