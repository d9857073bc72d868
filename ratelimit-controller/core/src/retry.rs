use std::{borrow::Cow, future::Future};
use tokio::time::{self, Duration};
use tracing::{debug, warn};

/// Retries a fallible remote call with a fixed delay between attempts.
///
/// A negative `max_attempts` retries until the call succeeds; zero makes
/// exactly one attempt; `n` allows the initial attempt plus `n` retries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryExecutor {
    max_attempts: i32,
    delay: Duration,
}

/// Classifies a failed call for logging and retry decisions.
pub trait RetryError {
    fn code(&self) -> Cow<'_, str>;

    fn message(&self) -> Cow<'_, str>;

    /// Errors that cannot succeed on a later attempt end the retry loop early.
    fn is_retryable(&self) -> bool {
        true
    }
}

// === impl RetryExecutor ===

impl RetryExecutor {
    pub fn new(max_attempts: i32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn unbounded(delay: Duration) -> Self {
        Self::new(-1, delay)
    }

    /// Invokes `call` until it succeeds or the attempts are exhausted,
    /// returning the last error observed.
    pub async fn execute<T, E, F, Fut>(&self, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryError,
    {
        let mut retries = 0u64;
        loop {
            let error = match call().await {
                Ok(rsp) => return Ok(rsp),
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(code = %error.code(), message = %error.message(), "Call failed with a non-retryable error");
                return Err(error);
            }

            if self.max_attempts >= 0 && retries >= self.max_attempts as u64 {
                warn!(code = %error.code(), message = %error.message(), retries, "Retries exhausted");
                return Err(error);
            }

            retries += 1;
            warn!(
                code = %error.code(),
                message = %error.message(),
                attempt = retries,
                delay = ?self.delay,
                "Call failed; retrying",
            );
            time::sleep(self.delay).await;
        }
    }
}

// === impl RetryError ===

impl RetryError for tonic::Status {
    fn code(&self) -> Cow<'_, str> {
        Cow::Borrowed(crate::grpc_code_str(tonic::Status::code(self)))
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Borrowed(tonic::Status::message(self))
    }
}
