//! Bounded polling and retry with exponential backoff.
//!
//! Every readiness check in the deploy pipeline (SSH up, device attached,
//! registry answering, rollout complete) goes through `poll`. Transient
//! network failures against provider APIs go through `retry`.

use std::future::Future;
use std::time::Duration;

use crate::errors::{Error, Result};

/// Invoke `predicate` up to `max_attempts` times, sleeping `interval`
/// between attempts, until it returns `Ok(true)`.
///
/// Attempts are 1-indexed. A predicate that returns an error counts as a
/// failed attempt, not a fatal one. When all attempts are exhausted the
/// waiter fails with `Error::Timeout` carrying `message`.
///
/// Tests pass `Duration::ZERO` to poll without sleeping.
pub async fn poll<F, Fut>(
    max_attempts: u32,
    interval: Duration,
    message: &str,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=max_attempts {
        match predicate().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                tracing::debug!("waiting for {}: attempt {}/{}", message, attempt, max_attempts);
            }
            Err(err) => {
                tracing::debug!(
                    "waiting for {}: attempt {}/{} errored: {}",
                    message,
                    attempt,
                    max_attempts,
                    err
                );
            }
        }
        if attempt < max_attempts && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    Err(Error::Timeout(message.to_string()))
}

/// Run `op` up to `max_attempts` times, backing off `backoff_base * 2^(n-1)`
/// between attempts. Only transient failures (connection-class, 5xx, 429)
/// are retried; anything else propagates immediately.
pub async fn retry<T, F, Fut>(max_attempts: u32, backoff_base: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                tracing::warn!("transient failure (attempt {}/{}): {}", attempt, max_attempts, err);
                if attempt < max_attempts && !backoff_base.is_zero() {
                    let backoff = backoff_base * 2u32.pow(attempt - 1);
                    tokio::time::sleep(backoff).await;
                }
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Other("retry exhausted with no attempts".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_poll_succeeds_on_first_attempt() {
        let result = poll(3, Duration::ZERO, "thing", || async { Ok(true) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_poll_succeeds_on_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = poll(5, Duration::ZERO, "thing", move || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1 >= 3) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "Expected exactly 3 attempts");
    }

    #[tokio::test]
    async fn test_poll_times_out_with_message() {
        let result = poll(2, Duration::ZERO, "ssh on 10.0.0.5", || async { Ok(false) }).await;
        match result {
            Err(Error::Timeout(msg)) => assert_eq!(msg, "ssh on 10.0.0.5"),
            other => panic!("Expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_counts_errors_as_failed_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = poll(3, Duration::ZERO, "flaky", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Connection("refused".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "Expected all attempts consumed");
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let result: Result<()> = retry(3, Duration::ZERO, || async {
            Err(Error::Connection("unreachable".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_fatal_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = retry(5, Duration::ZERO, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Authentication("bad token".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Fatal errors must not be retried");
    }

    #[tokio::test]
    async fn test_retry_returns_value_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry(4, Duration::ZERO, move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::api(502, "bad gateway", "upstream"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
