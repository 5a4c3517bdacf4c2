//! Bounded retry and convergence polling against the compute provider.
//!
//! Only transient provider errors are retried; fatal errors return on the
//! first occurrence.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::error::ProviderError;
use crate::providers::{ComputeProvider, FunctionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    Fatal(ProviderError),
    Exhausted { attempts: u32, last: ProviderError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<Retried<T>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) if !error.is_transient() => return Err(RetryError::Fatal(error)),
            Err(error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                })
            }
            Err(error) => {
                let delay = policy.backoff(attempt);
                warn!(
                    component = "retry",
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient provider error, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    Done,
    Pending,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    Retry(RetryError),
    Failed(String),
    TimedOut(Duration),
}

/// Polls the function status until `verdict` reports done or failed.
///
/// Transient status-read errors are retried per `retry`; the whole wait is
/// bounded by `wait.timeout`.
pub async fn poll_status<V>(
    provider: &dyn ComputeProvider,
    function_name: &str,
    retry: &RetryPolicy,
    wait: &WaitPolicy,
    mut verdict: V,
) -> Result<FunctionStatus, PollError>
where
    V: FnMut(&FunctionStatus) -> PollVerdict,
{
    let started = Instant::now();
    loop {
        let status = retry_transient(retry, "function_status", || {
            provider.function_status(function_name)
        })
        .await
        .map_err(PollError::Retry)?
        .value;

        match verdict(&status) {
            PollVerdict::Done => return Ok(status),
            PollVerdict::Failed(reason) => return Err(PollError::Failed(reason)),
            PollVerdict::Pending => {}
        }

        let waited = started.elapsed();
        if waited >= wait.timeout {
            return Err(PollError::TimedOut(waited));
        }
        sleep(wait.poll_interval.min(wait.timeout - waited)).await;
    }
}
