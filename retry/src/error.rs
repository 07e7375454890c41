//! Failure taxonomy of the retry and poll engines
//!
//! Only [`RetryError::Timeout`] and [`RetryError::PollTimeout`] are
//! synthesized here; a non-retryable failure is handed back unchanged in
//! [`RetryError::Fatal`]. A retryable failure under disabled mode is not an
//! error at all: the engine resolves to `Ok(None)`.

use std::time::Duration;

/// Retry result type
pub type Result<T, E> = std::result::Result<T, RetryError<E>>;

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that did not match `error_match`
    #[error("{0}")]
    Fatal(E),

    /// Retryable failures kept recurring past the timeout
    #[error(
        "retry timed out after {timeout_ms}ms ({attempts} attempts){}",
        failure_suffix(.last_failure.as_deref())
    )]
    Timeout {
        timeout_ms: u64,
        attempts: u32,
        elapsed: Duration,
        last_failure: Option<String>,
    },

    /// No truthy result before the outer deadline
    #[error("timed out after {timeout_ms}ms waiting for a truthy result ({polls} polls)")]
    PollTimeout { timeout_ms: u64, polls: u32 },

    /// External cancellation requested
    #[error("retry aborted by cancellation")]
    Aborted,
}

fn failure_suffix(last_failure: Option<&str>) -> String {
    last_failure.map(|failure| format!(": {failure}")).unwrap_or_default()
}

impl<E> RetryError<E> {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RetryError::Timeout { .. } | RetryError::PollTimeout { .. }
        )
    }

    /// The operation's own error, if this is [`RetryError::Fatal`].
    pub fn into_fatal(self) -> Option<E> {
        match self {
            RetryError::Fatal(err) => Some(err),
            _ => None,
        }
    }

    pub fn map_fatal<F, E2>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            RetryError::Fatal(err) => RetryError::Fatal(f(err)),
            RetryError::Timeout {
                timeout_ms,
                attempts,
                elapsed,
                last_failure,
            } => RetryError::Timeout {
                timeout_ms,
                attempts,
                elapsed,
                last_failure,
            },
            RetryError::PollTimeout { timeout_ms, polls } => {
                RetryError::PollTimeout { timeout_ms, polls }
            }
            RetryError::Aborted => RetryError::Aborted,
        }
    }
}
