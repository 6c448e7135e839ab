//! Exponential backoff for calls that fail while the store is unreachable.
use std::{fmt::Display, future::Future, time::Duration};

use ledger::LedgerError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors that may succeed if the same call is simply made again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2,
        }
    }
}

pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    delay: Duration,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            delay: policy.initial,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn reset(&mut self) {
        self.delay = self.policy.initial;
    }

    /// Sleeps for the current delay, then grows it. Returns `false` if
    /// cancelled first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.delay) => {
                self.delay = (self.delay * self.policy.factor.max(1)).min(self.policy.max);
                true
            }
        }
    }
}

/// Runs `op` until it succeeds, fails permanently or `cancel` fires. On
/// cancellation the last transient error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = Backoff::new(policy);

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!("{what} failed, retrying in {:?}: {e}", backoff.delay());

                if !backoff.wait(cancel).await {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (transient: {})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result: Result<usize, Flaky> =
            retry(&RetryPolicy::default(), &cancel, "op", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 { Err(Flaky(true)) } else { Ok(n) }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result: Result<(), Flaky> = retry(&RetryPolicy::default(), &cancel, "op", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(false))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), Flaky> =
            retry(&RetryPolicy::default(), &cancel, "op", || async { Err(Flaky(true)) }).await;

        assert!(result.unwrap_err().0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_to_max() {
        let policy = RetryPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(3),
            factor: 2,
        };
        let cancel = CancellationToken::new();
        let mut backoff = Backoff::new(&policy);

        assert!(backoff.wait(&cancel).await);
        assert_eq!(backoff.delay(), Duration::from_secs(2));
        assert!(backoff.wait(&cancel).await);
        assert_eq!(backoff.delay(), Duration::from_secs(3));
        backoff.reset();
        assert_eq!(backoff.delay(), Duration::from_secs(1));
    }
}
