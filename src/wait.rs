//! Bounded polling for UI preconditions.
//!
//! Selector waits retry locally with a fixed budget and then give up; the
//! caller decides which error that becomes.

use std::thread;
use std::time::Duration;

use tracing::trace;

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Total number of checks, including the first one.
    pub attempts: u32,
    /// Sleep between two checks.
    pub interval: Duration,
}

impl RetryBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on the time spent sleeping.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

/// Outcome of [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polled {
    /// Condition held on the given 1-based attempt.
    Ready { attempt: u32 },
    /// Budget exhausted after this many checks.
    Exhausted { attempts: u32 },
}

impl Polled {
    pub fn is_ready(self) -> bool {
        matches!(self, Polled::Ready { .. })
    }
}

/// Check `condition` until it returns `true` or the budget runs out.
///
/// Errors from `condition` abort the wait immediately. There is no sleep after
/// the final check.
pub fn poll_until<E>(
    budget: RetryBudget,
    mut condition: impl FnMut() -> Result<bool, E>,
) -> Result<Polled, E> {
    let attempts = budget.attempts.max(1);
    for attempt in 1..=attempts {
        if condition()? {
            return Ok(Polled::Ready { attempt });
        }
        trace!(attempt, attempts, "condition not met");
        if attempt < attempts {
            thread::sleep(budget.interval);
        }
    }
    Ok(Polled::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(attempts: u32) -> RetryBudget {
        RetryBudget::new(attempts, Duration::from_millis(1))
    }

    #[test]
    fn ready_on_first_check() {
        let result: Result<_, ()> = poll_until(fast(5), || Ok(true));
        assert_eq!(result.unwrap(), Polled::Ready { attempt: 1 });
    }

    #[test]
    fn ready_after_a_few_checks() {
        let mut calls = 0;
        let result: Result<_, ()> = poll_until(fast(5), || {
            calls += 1;
            Ok(calls == 3)
        });
        assert_eq!(result.unwrap(), Polled::Ready { attempt: 3 });
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_after_exact_budget() {
        let mut calls = 0;
        let result: Result<_, ()> = poll_until(fast(4), || {
            calls += 1;
            Ok(false)
        });
        assert_eq!(result.unwrap(), Polled::Exhausted { attempts: 4 });
        assert_eq!(calls, 4);
    }

    #[test]
    fn error_aborts_the_wait() {
        let mut calls = 0;
        let result = poll_until(fast(10), || {
            calls += 1;
            if calls == 2 { Err("boom") } else { Ok(false) }
        });
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_attempts_still_checks_once() {
        let result: Result<_, ()> = poll_until(RetryBudget::new(0, Duration::ZERO), || Ok(true));
        assert!(result.unwrap().is_ready());
    }

    #[test]
    fn max_wait_counts_gaps_only() {
        let budget = RetryBudget::new(10, Duration::from_secs(10));
        assert_eq!(budget.max_wait(), Duration::from_secs(90));
        assert_eq!(
            RetryBudget::new(1, Duration::from_secs(10)).max_wait(),
            Duration::ZERO
        );
    }
}
