//! Exponential backoff for calls against the remote APIs.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 8,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// attempt limit is reached. The delay doubles between attempts up to the
/// configured cap.
pub async fn retry<T, F, Fut>(config: RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < config.max_attempts => {
                tracing::debug!(attempt, ?delay, error = %err, "retrying transient failure");
                sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
