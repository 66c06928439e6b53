//! Bounded exponential-backoff retry wrapper.
//!
//! Wraps a single fallible async operation. Backoff delays are cooperative
//! `tokio::time::sleep`s. On exhaustion the last failure is re-raised,
//! augmented with the total attempt count; when that failure carried a
//! sub-critical severity, the wrapper stamps `original_severity` so the
//! downstream failure policy still sees what the error was before retries
//! ran out.

use std::future::Future;
use std::time::Duration;

use briefcast_state::Severity;
use tracing::warn;

use crate::error::StageFailure;

/// Retry configuration for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = single attempt).
    pub max_retries: u32,
    /// First backoff delay; doubles each retry.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the default 30s backoff ceiling.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Override the backoff ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Backoff before retry number `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A successful result plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// Total invocations, including the first.
    pub attempts: u32,
}

/// Run `op` with bounded exponential-backoff retries.
///
/// `on_retry(attempt, delay, error)` fires before each backoff sleep, for
/// observability (attempt is 1-based: the attempt that just failed).
pub async fn with_retry<T, Op, Fut, Cb>(
    policy: &RetryPolicy,
    mut op: Op,
    mut on_retry: Cb,
) -> Result<Retried<T>, StageFailure>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageFailure>>,
    Cb: FnMut(u32, Duration, &StageFailure),
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt + 1,
                });
            }
            Err(failure) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                on_retry(attempt, delay, &failure);
                tokio::time::sleep(delay).await;
            }
            Err(mut failure) => {
                let attempts = attempt + 1;
                failure.attempts = attempts;
                // Preserve the pre-exhaustion severity so exhaustion does not
                // force a sub-critical error into an abort.
                if failure.original_severity.is_none() {
                    if let Some(sev) = failure.severity {
                        if sev != Severity::Critical {
                            failure.original_severity = Some(sev);
                        }
                    }
                }
                warn!(
                    code = %failure.code,
                    attempts,
                    "operation failed after retries exhausted"
                );
                return Err(failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefcast_state::Severity;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing(code: &str, severity: Option<Severity>) -> StageFailure {
        StageFailure {
            code: code.to_string(),
            message: "synthetic failure".to_string(),
            severity,
            attempts: 1,
            original_severity: None,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        // capped
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_op_runs_initial_plus_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let mut delays = Vec::new();

        let policy = RetryPolicy::new(3, Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(30_000));

        let result: Result<Retried<()>, _> = with_retry(
            &policy,
            || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(failing("ALWAYS_FAILS", Some(Severity::Recoverable)))
                }
            },
            |_, delay, _| delays.push(delay),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4, "1 initial + 3 retries");
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.original_severity, Some(Severity::Recoverable));
        assert_eq!(failure.effective_severity(), Some(Severity::Recoverable));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let result = with_retry(
            &policy,
            || {
                let calls = calls_in.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failing("FLAKY", None))
                    } else {
                        Ok("episode-42")
                    }
                }
            },
            |_, _, _| {},
        )
        .await
        .unwrap();

        assert_eq!(result.value, "episode-42");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn critical_severity_is_not_marked_original() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let result: Result<Retried<()>, _> = with_retry(
            &policy,
            || async { Err(failing("FATAL", Some(Severity::Critical))) },
            |_, _, _| {},
        )
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.original_severity, None);
        assert_eq!(failure.effective_severity(), Some(Severity::Critical));
    }

    #[tokio::test]
    async fn severityless_failure_stays_unclassified() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1));
        let result: Result<Retried<()>, _> = with_retry(
            &policy,
            || async { Err(failing("MYSTERY", None)) },
            |_, _, _| {},
        )
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.effective_severity(), None);
        assert_eq!(failure.attempts, 2);
    }
}
