//! Bounded exponential backoff

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::abort::AbortSignal;
use crate::client::ApiResult;
use crate::error::ApiError;

/// Retry configuration for a synced query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (0-based): `base * factor^retry`,
    /// capped at `max_delay`. A rate-limit hint raises the delay up to the cap.
    pub fn delay_for(&self, retry: u32, error: &ApiError) -> Duration {
        let exp = self.factor.max(1.0).powi(retry.min(30) as i32);
        let millis = (self.base_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        let delay = Duration::from_millis(millis as u64);

        match error {
            ApiError::RateLimit(hint) => delay.max(*hint).min(self.max_delay),
            _ => delay,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, runs out of
/// retries, or `signal` is aborted.
///
/// `on_failure` sees every failed attempt (1-based count) before the
/// decision to retry is made.
pub async fn retry_with_backoff<T, F, Fut, C>(
    policy: &RetryPolicy,
    signal: &AbortSignal,
    mut on_failure: C,
    mut op: F,
) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
    C: FnMut(u32, &ApiError),
{
    let mut retry = 0;
    loop {
        signal.check()?;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if matches!(err, ApiError::Aborted(_)) {
            return Err(err);
        }
        on_failure(retry + 1, &err);

        if !err.is_transient() || retry >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.delay_for(retry, &err);
        debug!(
            "Attempt {} failed ({}), retrying in {:?}",
            retry + 1,
            err,
            delay
        );

        tokio::select! {
            _ = signal.aborted() => return Err(signal.check().err().unwrap_or(err)),
            _ = tokio::time::sleep(delay) => {}
        }
        retry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::{AbortReason, create_abort_controller};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = RetryPolicy::default();
        let err = ApiError::Network("down".into());

        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_rate_limit_hint_respected() {
        let policy = RetryPolicy::default();

        let delay = policy.delay_for(0, &ApiError::RateLimit(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));

        let capped = policy.delay_for(0, &ApiError::RateLimit(Duration::from_secs(600)));
        assert_eq!(capped, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut failures = Vec::new();

        let result = retry_with_backoff(
            &RetryPolicy::default(),
            &AbortSignal::never(),
            |n, _| failures.push(n),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::Network("flaky".into()))
                    } else {
                        Ok("rows")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok("rows"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failures, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ApiResult<()> = retry_with_backoff(
            &RetryPolicy::default(),
            &AbortSignal::never(),
            |_, _| {},
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::ServerError("502".into()))
                }
            },
        )
        .await;

        assert_eq!(result, Err(ApiError::ServerError("502".into())));
        // One attempt plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ApiResult<()> = retry_with_backoff(
            &RetryPolicy::default(),
            &AbortSignal::never(),
            |_, _| {},
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Unauthorized)
                }
            },
        )
        .await;

        assert_eq!(result, Err(ApiError::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_backoff() {
        let (controller, signal) = create_abort_controller();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            controller.abort(AbortReason::Teardown);
        });

        let result: ApiResult<()> = retry_with_backoff(
            &RetryPolicy::default(),
            &signal,
            |_, _| {},
            || async { Err(ApiError::Network("down".into())) },
        )
        .await;

        assert_eq!(result, Err(ApiError::Aborted("Teardown".into())));
        canceller.await.unwrap();
    }
}
