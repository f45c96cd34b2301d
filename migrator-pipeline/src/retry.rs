//! The retry policy shared by every network call of a run.
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

/// Bounded exponential backoff with jitter.
///
/// The delay before retry `n` (from 1) is `backoff_base_ms^n * factor`
/// milliseconds capped at `max_delay`, then jittered down to a random share
/// of itself. The defaults give 20 ms, 200 ms, 2 s and 5 s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. `1` disables retrying.
    pub max_attempts: usize,
    /// Base of the exponent, in milliseconds.
    pub backoff_base_ms: u64,
    pub factor: u64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 10,
            factor: 2,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// The error that ended a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::from_millis(self.backoff_base_ms.max(1))
            .factor(self.factor.max(1))
            .max_delay(self.max_delay)
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        self.backoff()
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }

    /// Runs `operation` until it succeeds, fails with an error `is_transient`
    /// rejects, or the attempts are used up.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        mut operation: F,
        is_transient: fn(&E) -> bool,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = AtomicUsize::new(0);
        let max_attempts = self.max_attempts.max(1);

        let result = RetryIf::spawn(
            self.delays(),
            || {
                let attempt = operation();
                let attempts = &attempts;
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let result = attempt.await;
                    if let Err(e) = &result {
                        if is_transient(e) && n < max_attempts {
                            warn!(what, attempt = n, max_attempts, error = %e, "Transient failure, retrying");
                        }
                    }
                    result
                }
            },
            |e: &E| is_transient(e),
        )
        .await;

        result.map_err(|error| RetryFailure {
            error,
            attempts: attempts.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Flaky,
        Fatal,
    }

    impl Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn flaky(e: &Failure) -> bool {
        *e == Failure::Flaky
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let result = RetryPolicy::default()
            .run(
                "test",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Failure::Flaky)
                    } else {
                        Ok(7)
                    }
                },
                flaky,
            )
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .run("test", || async { Err(Failure::Flaky) }, flaky)
            .await;

        assert_eq!(
            result,
            Err(RetryFailure {
                error: Failure::Flaky,
                attempts: 3
            })
        );
    }

    #[test]
    fn default_backoff_grows_by_powers_of_the_base() {
        let delays: Vec<Duration> = RetryPolicy::default().backoff().take(4).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(20),
                Duration::from_millis(200),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let result: Result<(), _> = RetryPolicy::default()
            .run("test", || async { Err(Failure::Fatal) }, flaky)
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
