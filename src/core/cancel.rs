//! TR-010: Cancellation signal checked by the executor between ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation: an explicit flag plus an optional deadline.
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that also fires once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline; `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the signal fired, for the state record.
    pub fn reason(&self) -> &'static str {
        if self.flag.load(Ordering::SeqCst) {
            "cancelled"
        } else {
            "timed out"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr010_default_not_cancelled() {
        assert!(!CancelSignal::new().is_cancelled());
    }

    #[test]
    fn test_tr010_clone_shares_flag() {
        let signal = CancelSignal::new();
        let handle = signal.clone();
        handle.cancel();
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason(), "cancelled");
    }

    #[test]
    fn test_tr010_zero_timeout_fires() {
        let signal = CancelSignal::with_timeout(Duration::ZERO);
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason(), "timed out");
    }

    #[test]
    fn test_tr010_long_timeout_pending() {
        let signal = CancelSignal::with_timeout(Duration::from_secs(3600));
        assert!(!signal.is_cancelled());
        assert!(signal.remaining().unwrap() > Duration::from_secs(3500));
        assert_eq!(CancelSignal::new().remaining(), None);
    }
}
