//! Shared HTTP plumbing: status mapping and bounded retry

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;
use crate::error::{IngestError, Result};

/// Turn a non-success response into a typed protocol error
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IngestError::from_status(
        status.as_u16(),
        format!("{} {}", status, truncate(&body, 512)),
    ))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Delays grow as `base * 2^attempt` plus jitter.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = jittered(policy.delay(attempt));
                tracing::warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    label,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                }
                return Err(e);
            }
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 10 {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0..=millis / 10);
    Duration::from_millis(millis + extra)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "probe", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(IngestError::from_status(503, "busy"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast(), "probe", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::from_status(403, "forbidden"))
        })
        .await;
        assert!(matches!(result, Err(IngestError::ClientProtocol { status: 403, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast(), "probe", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::TransientNetwork("reset".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
