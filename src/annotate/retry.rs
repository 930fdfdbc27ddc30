//! Bounded retry with exponential backoff.

use metrics::counter;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::AnnotationError;

const MAX_DELAY: Duration = Duration::from_secs(30);

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AnnotationError {
    fn is_retryable(&self) -> bool {
        AnnotationError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500), 2)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, multiplier: u32) -> Self {
        Self {
            max_retries,
            initial_backoff,
            multiplier: multiplier.max(1),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based), capped at 30s.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    tracing::debug!(
                        target: "annotate",
                        error = %e,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying"
                    );
                    counter!("annotate_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedule_is_exponential_and_capped() {
        let p = RetryPolicy::new(3, Duration::from_millis(500), 2);
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(40), MAX_DELAY);
        assert_eq!(p.max_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_bound() {
        let p = RetryPolicy::default();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res: Result<(), AnnotationError> = p
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AnnotationError::Transport("reset".into()))
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let p = RetryPolicy::default();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res = p
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AnnotationError::Status(503))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(res.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let p = RetryPolicy::default();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res: Result<(), AnnotationError> = p
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AnnotationError::MalformedResponse("not json".into()))
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
