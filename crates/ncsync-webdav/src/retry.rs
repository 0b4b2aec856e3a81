use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::WebDavError;

/// Back-off schedule (spec.md §4.C). Defaults match the spec verbatim.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            randomization_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// The back-off for the attempt *after* `attempt_index` (0-based) has
    /// failed, with additive jitter in `±randomization_factor`.
    fn delay_for(&self, attempt_index: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt_index as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter_span = capped * self.randomization_factor;
        let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

/// Runs `attempt_fn` until it succeeds, exhausts `config.max_retries`, a
/// non-temporary error is returned, or `cancel` fires. A pure function of
/// its inputs (spec.md §9), so it is testable with a counting `attempt_fn`
/// and a fake clock is not required — the sleep itself is the only
/// non-determinism, and cancellation is checked before *and* during it so a
/// signal raised mid-sleep still returns promptly (spec.md §8 property 8).
pub async fn retry_with_backoff<F, Fut, T>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, WebDavError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, WebDavError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled_error());
        }

        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_temporary() && attempt < config.max_retries => {
                let delay = error.retry_after().unwrap_or_else(|| config.delay_for(attempt));
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled_error()),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn cancelled_error() -> WebDavError {
    WebDavError::Cancelled {
        method: "RETRY",
        path: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::StatusCode;

    use super::*;

    #[tokio::test]
    async fn succeeds_after_k_temporary_failures_within_budget() {
        let counter = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        };

        let result = retry_with_backoff(config, &cancel, |_attempt| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WebDavError::Temporary {
                        method: "PUT",
                        path: "a.txt".into(),
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        retry_after: None,
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_the_last_error() {
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        };

        let result: Result<(), WebDavError> = retry_with_backoff(config, &cancel, |_attempt| async {
            Err(WebDavError::Temporary {
                method: "PUT",
                path: "a.txt".into(),
                status: StatusCode::SERVICE_UNAVAILABLE,
                retry_after: None,
            })
        })
        .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().is_temporary());
    }

    #[tokio::test]
    async fn non_temporary_errors_are_not_retried() {
        let cancel = CancellationToken::new();
        let counter = AtomicU32::new(0);

        let result: Result<(), WebDavError> = retry_with_backoff(RetryConfig::default(), &cancel, |_attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(WebDavError::Permission { method: "PUT", path: "a.txt".into() }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_promptly() {
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..RetryConfig::default()
        };

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let start = tokio::time::Instant::now();
        let result: Result<(), WebDavError> = retry_with_backoff(config, &cancel, |_attempt| async {
            Err(WebDavError::Temporary {
                method: "PUT",
                path: "a.txt".into(),
                status: StatusCode::SERVICE_UNAVAILABLE,
                retry_after: None,
            })
        })
        .await;

        assert!(matches!(result, Err(WebDavError::Cancelled { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
