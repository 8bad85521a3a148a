use crate::context::EvalContext;
use crate::error::Error;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Retry configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff_multiplier: f64,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.5,
            max_elapsed: Duration::from_secs(15 * 60),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error,
/// exhausts `max_elapsed`, or `ctx` is done.
///
/// The attempt number (starting at 1) is passed to `operation`. When `ctx`
/// ends the loop, its own error is returned so callers can tell a deadline
/// apart from the last attempt's failure.
pub async fn retry_with_backoff<F, Fut, T>(
    ctx: &EvalContext,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => error,
        };

        if started.elapsed() + delay > config.max_elapsed {
            return Err(error);
        }

        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying operation with exponential backoff"
        );

        tokio::select! {
            err = ctx.done() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = std::cmp::min(
            Duration::from_millis((delay.as_millis() as f64 * config.backoff_multiplier) as u64),
            config.max_delay,
        );
    }
}
