/// Retry with exponential backoff, used by the tracker client and peer RPC
/// calls. Grounded directly on the teacher's `resilience.rs::retry_async`.
use crate::error::DecentralisResult;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

pub async fn retry_async<F, Fut, T>(operation: F, config: RetryConfig, operation_name: &str) -> DecentralisResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DecentralisResult<T>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        debug!("attempting {operation_name} ({attempt}/{})", config.max_attempts);
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < config.max_attempts {
                    warn!("{operation_name} failed on attempt {attempt}, retrying in {delay:?}: {e}");
                    sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_millis((delay.as_millis() as f64 * config.backoff_multiplier) as u64),
                        config.max_delay,
                    );
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecentralisError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicUsize::new(0);
        let result = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DecentralisError>(42)
            },
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            "test-op",
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_async(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(DecentralisError::PeerCommunication("not yet".to_string()))
                } else {
                    Ok(n)
                }
            },
            RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            "test-op",
        )
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let result: DecentralisResult<()> = retry_async(
            || async { Err(DecentralisError::PeerCommunication("always fails".to_string())) },
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_multiplier: 2.0,
            },
            "test-op",
        )
        .await;
        assert!(result.is_err());
    }
}
