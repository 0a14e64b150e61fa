//! Bounded retry for store operations. RPC calls use the unbounded racing
//! retry in `indexer::client` instead.

use anyhow::{Error, Result};
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            exponential: 2.0,
        }
    }
}

pub async fn retry<F, Fut, T>(operation: F, config: &RetryConfig, context: &str) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    let mut ceiling = config.base_delay_ms;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= config.max_attempts => {
                error!(
                    "Operation '{}' failed after {} attempts. Final error: {:#}",
                    context, attempt, e
                );
                return Err(e.context(format!("'{}' failed after {} attempts", context, attempt)));
            }
            Err(e) => {
                // Full jitter: sleep a random duration below the current ceiling
                let delay = (fastrand::f64() * ceiling as f64) as u64;
                warn!(
                    "Attempt {}/{} for '{}' failed: {:#}. Retrying in {}ms...",
                    attempt, config.max_attempts, context, e, delay
                );

                sleep(Duration::from_millis(delay)).await;

                ceiling = std::cmp::min(
                    config.max_delay_ms,
                    (ceiling as f64 * config.exponential) as u64,
                );
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("store unavailable"))
                } else {
                    Ok(7)
                }
            },
            &RetryConfig::default(),
            "write_block",
        )
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let result: Result<()> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("store unavailable"))
            },
            &config,
            "purge_block",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
