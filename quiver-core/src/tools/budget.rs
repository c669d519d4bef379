//! Session budget for registry batches
//!
//! The call counter and the wall-clock window live behind one mutex so that
//! admission checks from concurrent batches never interleave. The window is
//! measured on the tokio clock, so a paused test runtime controls it.

use crate::config::BudgetConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of budget consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    /// Calls admitted since creation or the last reset
    pub calls: u64,

    /// Time since creation or the last reset
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// Configured call limit
    pub max_calls: Option<u64>,

    /// Configured wall-clock limit
    #[serde(with = "humantime_serde")]
    pub max_duration: Option<Duration>,
}

#[derive(Debug)]
struct BudgetState {
    calls: u64,
    started: Instant,
}

/// Admits calls until a call-count or wall-clock limit is reached
#[derive(Debug)]
pub struct BudgetGuard {
    config: BudgetConfig,
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    /// Create a guard; the clock starts now
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BudgetState {
                calls: 0,
                started: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether any limit is configured
    pub fn is_limited(&self) -> bool {
        self.config.max_calls.is_some() || self.config.max_duration.is_some()
    }

    /// Admit one call, or explain why the budget is exhausted
    pub fn try_admit(&self) -> Result<(), String> {
        let mut state = self.lock();

        if let Some(max_duration) = self.config.max_duration {
            if state.started.elapsed() >= max_duration {
                return Err(format!(
                    "Budget exceeded: time limit of {}ms reached",
                    max_duration.as_millis()
                ));
            }
        }

        if let Some(max_calls) = self.config.max_calls {
            if state.calls >= max_calls {
                return Err(format!(
                    "Budget exceeded: call limit of {} reached",
                    max_calls
                ));
            }
        }

        state.calls += 1;
        Ok(())
    }

    /// Zero the counter and restart the clock
    pub fn reset(&self) {
        let mut state = self.lock();
        state.calls = 0;
        state.started = Instant::now();
    }

    /// Current consumption
    pub fn usage(&self) -> BudgetUsage {
        let state = self.lock();
        BudgetUsage {
            calls: state.calls,
            elapsed: state.started.elapsed(),
            max_calls: self.config.max_calls,
            max_duration: self.config.max_duration,
        }
    }
}

#[cfg(test)]
mod budget_tests {
    use super::*;

    #[test]
    fn test_unlimited_budget_admits_everything() {
        let guard = BudgetGuard::new(BudgetConfig::default());
        assert!(!guard.is_limited());
        for _ in 0..100 {
            assert!(guard.try_admit().is_ok());
        }
        assert_eq!(guard.usage().calls, 100);
    }

    #[test]
    fn test_call_limit() {
        let guard = BudgetGuard::new(BudgetConfig {
            max_calls: Some(2),
            max_duration: None,
        });

        assert!(guard.try_admit().is_ok());
        assert!(guard.try_admit().is_ok());
        let denial = guard.try_admit().unwrap_err();
        assert!(denial.contains("call limit of 2"));
        assert_eq!(guard.usage().calls, 2);

        guard.reset();
        assert!(guard.try_admit().is_ok());
    }

    #[test]
    fn test_time_limit() {
        let guard = BudgetGuard::new(BudgetConfig {
            max_calls: None,
            max_duration: Some(Duration::from_millis(5)),
        });
        assert!(guard.try_admit().is_ok());

        std::thread::sleep(Duration::from_millis(10));
        assert!(guard.try_admit().unwrap_err().contains("time limit"));

        guard.reset();
        assert!(guard.try_admit().is_ok());
    }
}
