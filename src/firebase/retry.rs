use log::error;
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};

/// How many extra attempts a store write gets, and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub const WAIT_BETWEEN_RETRIES: Duration = Duration::from_secs(5);

    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            wait: Self::WAIT_BETWEEN_RETRIES,
        }
    }

    /// Fail on the first error.
    pub fn none() -> Self {
        Self::new(0)
    }
}

/// Run `operation` until it succeeds or the policy's retries are used up.
///
/// The last error is returned unchanged. Nothing is queued between attempts.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    what: &str,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                error!(
                    "Attempt {}/{}: {} failed: {}",
                    attempt,
                    policy.retries + 1,
                    what,
                    e
                );
                sleep(policy.wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
