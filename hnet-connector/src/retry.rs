use crate::{config::RetryConfig, error::GatewayError};
use std::future::Future;

/// A gateway round-trip that did not succeed within the retry budget.
#[derive(Debug)]
pub(crate) struct RetryFailure {
    pub attempts: u32,
    pub error: GatewayError,
}

impl RetryFailure {
    /// `true` when the budget ran out on transient errors, as opposed to a permanent rejection.
    pub fn exhausted(&self) -> bool {
        self.error.is_transient()
    }
}

/// Runs `op` until it succeeds, fails permanently, or `policy.max_attempts` transient
/// failures have been seen. Delays grow exponentially with jitter.
pub(crate) async fn with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let backoff = backoff::ExponentialBackoff {
        initial_interval: policy.initial_interval(),
        current_interval: policy.initial_interval(),
        randomization_factor: 0.1,
        multiplier: policy.multiplier,
        max_interval: policy.max_interval(),
        max_elapsed_time: None,
        ..Default::default()
    };
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0u32;

    let result = backoff::future::retry(backoff, || {
        attempts += 1;
        let attempt = attempts;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(attempt, "Retrying {} after transient error: {}", what, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await;

    result.map_err(|error| RetryFailure { attempts, error })
}
