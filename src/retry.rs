//! Bounded polling used to confirm provider state transitions.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Interval and budget of a polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Total budget measured from the first attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of one probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Attempt<T> {
    /// The condition holds; stop polling.
    Ready(T),
    /// The condition does not hold yet. Carries the value observed, if any,
    /// which replaces the previously recorded observation.
    Pending(Option<T>),
}

/// Outcome of [`poll_until`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollOutcome<T> {
    /// `true` when a probe returned [`Attempt::Ready`] within the budget.
    pub satisfied: bool,
    /// Last value observed by any probe.
    pub last: Option<T>,
    /// Number of probes run.
    pub attempts: u32,
}

/// Runs `probe` until it reports [`Attempt::Ready`] or the next attempt would
/// start after the deadline.
///
/// The first probe runs immediately; subsequent probes run `interval` apart.
/// A probe error aborts the loop and is returned as-is, so probes decide which
/// failures are transient by mapping them to [`Attempt::Pending`]. Dropping
/// the returned future cancels polling, which lets callers impose their own
/// outer timeout. A budget too large to represent as a deadline polls
/// without a deadline.
///
/// # Errors
///
/// Returns the first error produced by `probe`.
pub async fn poll_until<T, E, F, Fut>(policy: RetryPolicy, mut probe: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, E>>,
{
    let deadline = Instant::now().checked_add(policy.timeout);
    let mut last = None;
    let mut attempts = 0_u32;

    loop {
        attempts = attempts.saturating_add(1);
        match probe().await? {
            Attempt::Ready(value) => {
                return Ok(PollOutcome {
                    satisfied: true,
                    last: Some(value),
                    attempts,
                });
            }
            Attempt::Pending(observed) => {
                if observed.is_some() {
                    last = observed;
                }
            }
        }

        if past_deadline(Instant::now().checked_add(policy.interval), deadline) {
            break;
        }
        sleep(policy.interval).await;
    }

    Ok(PollOutcome {
        satisfied: false,
        last,
        attempts,
    })
}

/// `None` stands for a point beyond any representable instant.
fn past_deadline(next_attempt: Option<Instant>, deadline: Option<Instant>) -> bool {
    match (next_attempt, deadline) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(next), Some(limit)) => next > limit,
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use rstest::rstest;

    fn policy(interval_ms: u64, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_within_budget() {
        let started = Instant::now();
        let mut calls = 0_u32;
        let outcome = poll_until(policy(1_000, 3_000), || {
            calls += 1;
            let current = calls;
            async move {
                Ok::<_, Infallible>(if current == 3 {
                    Attempt::Ready(current)
                } else {
                    Attempt::Pending(Some(current))
                })
            }
        })
        .await
        .unwrap_or_else(|err| match err {});

        assert!(outcome.satisfied);
        assert_eq!(outcome.last, Some(3));
        assert_eq!(outcome.attempts, 3);
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(2_000) && elapsed < Duration::from_millis(3_000),
            "unexpected elapsed time: {elapsed:?}"
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn gives_up_after_deadline_keeping_last_observation() {
        let outcome = poll_until(policy(1_000, 2_500), || async {
            Ok::<_, Infallible>(Attempt::Pending(Some("pending")))
        })
        .await
        .unwrap_or_else(|err| match err {});

        assert!(!outcome.satisfied);
        assert_eq!(outcome.last, Some("pending"));
        assert_eq!(outcome.attempts, 3);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn probe_errors_abort_immediately() {
        let mut calls = 0_u32;
        let result = poll_until(policy(10, 1_000), || {
            calls += 1;
            async { Err::<Attempt<()>, _>("fatal") }
        })
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls, 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn pending_without_value_keeps_previous_observation() {
        let mut calls = 0_u32;
        let outcome = poll_until(policy(100, 150), || {
            calls += 1;
            let current = calls;
            async move {
                Ok::<_, Infallible>(if current == 1 {
                    Attempt::Pending(Some(current))
                } else {
                    Attempt::Pending(None)
                })
            }
        })
        .await
        .unwrap_or_else(|err| match err {});

        assert!(!outcome.satisfied);
        assert_eq!(outcome.last, Some(1));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn unrepresentable_budget_keeps_polling() {
        let mut calls = 0_u32;
        let outcome = poll_until(RetryPolicy::new(Duration::from_millis(10), Duration::MAX), || {
            calls += 1;
            let current = calls;
            async move {
                Ok::<_, Infallible>(if current == 4 {
                    Attempt::Ready(current)
                } else {
                    Attempt::Pending(None)
                })
            }
        })
        .await
        .unwrap_or_else(|err| match err {});

        assert!(outcome.satisfied);
        assert_eq!(outcome.attempts, 4);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn unrepresentable_interval_stops_after_first_attempt() {
        let outcome = poll_until(RetryPolicy::new(Duration::MAX, Duration::from_secs(1)), || async {
            Ok::<_, Infallible>(Attempt::Pending(Some("pending")))
        })
        .await
        .unwrap_or_else(|err| match err {});

        assert!(!outcome.satisfied);
        assert_eq!(outcome.attempts, 1);
    }
}
