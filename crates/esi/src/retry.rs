use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// One retry policy for every roster/oracle call site, instead of ad-hoc
/// retries scattered across them. Exponential backoff, no jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying errors that `retryable` accepts. The last error is
    /// returned as-is once attempts run out.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= attempts || !retryable(&e) => return Err(e),
                Err(e) => {
                    warn!(what, attempt, err = %e, "call failed; backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn immediate(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out: Result<u32, String> = immediate(3)
            .run("test", |_| true, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("nope".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out: Result<u32, String> = immediate(2)
            .run("test", |_| true, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still broken".to_string())
            })
            .await;
        assert_eq!(out, Err("still broken".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out: Result<u32, String> = immediate(5)
            .run("test", |_| false, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("denied".to_string())
            })
            .await;
        assert_eq!(out, Err("denied".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
