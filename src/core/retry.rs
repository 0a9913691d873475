//! TR-009: Retry with exponential backoff for transient adapter errors.

use super::cancel::CancelSignal;
use super::error::AdapterError;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Retry settings, read from the project's `policy.retry` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per adapter call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay after the given 0-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Config with zero delays, for tests and simulated adapters.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
        }
    }
}

/// Outcome of a retried call plus the number of attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, AdapterError>,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently, the attempt
/// budget is spent, or `cancel` fires. Only `Transient` errors are retried;
/// a backoff never sleeps past the cancel deadline.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    cancel: &CancelSignal,
    label: &str,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if !e.is_transient() || attempt >= max_attempts => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                }
            }
            Err(e) => {
                let delay = config.delay_for_attempt(attempt - 1);
                log::warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {}ms",
                    label,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                thread::sleep(cancel.remaining().map_or(delay, |left| delay.min(left)));
                if cancel.is_cancelled() {
                    log::warn!("{}: {} while backing off", label, cancel.reason());
                    return Attempted {
                        result: Err(AdapterError {
                            class: e.class,
                            message: format!("{} ({} before retry)", e.message, cancel.reason()),
                        }),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_tr009_success_first_try() {
        let never = CancelSignal::new();
        let out = with_retry(&RetryConfig::immediate(3), &never, "op", || {
            Ok::<_, AdapterError>(7)
        });
        assert_eq!(out.result.unwrap(), 7);
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_tr009_permanent_not_retried() {
        let calls = Cell::new(0);
        let never = CancelSignal::new();
        let out: Attempted<()> = with_retry(&RetryConfig::immediate(3), &never, "op", || {
            calls.set(calls.get() + 1);
            Err(AdapterError::permanent("invalid billing mode"))
        });
        assert!(out.result.is_err());
        assert_eq!(calls.get(), 1);
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_tr009_transient_then_success() {
        let calls = Cell::new(0);
        let never = CancelSignal::new();
        let out = with_retry(&RetryConfig::immediate(3), &never, "op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(AdapterError::transient("throttled"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(out.result.unwrap(), "done");
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn test_tr009_transient_exhausted() {
        let calls = Cell::new(0);
        let never = CancelSignal::new();
        let out: Attempted<()> = with_retry(&RetryConfig::immediate(3), &never, "op", || {
            calls.set(calls.get() + 1);
            Err(AdapterError::transient("throttled"))
        });
        assert!(out.result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_tr009_zero_attempts_still_calls_once() {
        let calls = Cell::new(0);
        let never = CancelSignal::new();
        let _ = with_retry(&RetryConfig::immediate(0), &never, "op", || {
            calls.set(calls.get() + 1);
            Ok::<_, AdapterError>(())
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_tr009_cancel_stops_retrying() {
        let cancel = CancelSignal::new();
        let calls = Cell::new(0);
        let out: Attempted<()> = with_retry(&RetryConfig::immediate(5), &cancel, "op", || {
            calls.set(calls.get() + 1);
            cancel.cancel();
            Err(AdapterError::transient("throttled"))
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(out.attempts, 1);
        let err = out.result.unwrap_err();
        assert!(err.message.contains("cancelled before retry"));
    }

    #[test]
    fn test_tr009_backoff_bounded_by_deadline() {
        let cfg = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10_000,
            backoff_factor: 1.0,
            max_delay_ms: 10_000,
        };
        let cancel = CancelSignal::with_timeout(Duration::from_millis(20));
        let start = std::time::Instant::now();
        let out: Attempted<()> = with_retry(&cfg, &cancel, "op", || {
            Err(AdapterError::transient("throttled"))
        });
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(out.attempts, 1);
        assert!(out.result.unwrap_err().message.contains("timed out"));
    }

    #[test]
    fn test_tr009_backoff_grows_and_caps() {
        let cfg = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 350,
        };
        assert_eq!(cfg.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn test_tr009_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
