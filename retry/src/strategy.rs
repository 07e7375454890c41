//! Retry engine
//!
//! Invokes an operation until it succeeds, a failure does not match the
//! configured [`ErrorMatch`](crate::ErrorMatch), or retryable failures keep
//! recurring past the timeout.
//!
//! Policy, in priority order, after each failed attempt:
//! 1. Non-matching failure: returned unchanged as [`RetryError::Fatal`],
//!    never retried.
//! 2. Matching failure in disabled mode: resolves to `Ok(None)`.
//! 3. Matching failure after the timeout: [`RetryError::Timeout`] carrying
//!    the last failure's text.
//! 4. Otherwise wait the poll interval and try again.
//!
//! The first attempt always runs, whatever the timeout.
//!
//! Failures are classified by their `Display` text. For an error that keeps
//! the transient message in its `source()` chain (a wrapper with
//! `#[source]`), use [`execute_chained`], which classifies the whole chain.

use crate::classifier;
use crate::config::{PollInterval, RetryConfiguration};
use crate::error::{Result, RetryError};
use crate::scheduler::Scheduler;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Retry status for progress callbacks
///
/// Reported after a retryable failure, right before waiting.
#[derive(Debug, Clone)]
pub struct RetryStatus {
    /// Attempt that just failed (1-indexed)
    pub attempt: u32,
    /// Total elapsed time since the first attempt
    pub elapsed: Duration,
    /// Wait before the next attempt
    pub sleep: PollInterval,
    /// When the next attempt starts, for fixed intervals
    pub resume_at: Option<Instant>,
    /// Rendered failure that triggered the retry
    pub last_failure: String,
    /// Human-readable reason for current state
    pub reason: String,
}

/// State of one call to the engine.
struct RetryInvocation<'a> {
    config: &'a RetryConfiguration,
    started: Instant,
    attempts: u32,
    last_failure: Option<String>,
}

impl<'a> RetryInvocation<'a> {
    fn new(config: &'a RetryConfiguration) -> Self {
        Self {
            config,
            started: Instant::now(),
            attempts: 0,
            last_failure: None,
        }
    }

    fn timed_out(&self) -> bool {
        self.started.elapsed() >= self.config.timeout()
    }

    fn timeout_error<E>(&self) -> RetryError<E> {
        let elapsed = self.started.elapsed();
        tracing::warn!(
            timeout_ms = self.config.timeout_ms,
            attempts = self.attempts,
            elapsed_ms = elapsed_ms(elapsed),
            last_failure = self.last_failure.as_deref().unwrap_or(""),
            "retry timed out"
        );
        RetryError::Timeout {
            timeout_ms: self.config.timeout_ms,
            attempts: self.attempts,
            elapsed,
            last_failure: self.last_failure.clone(),
        }
    }
}

/// Run `operation` under `config`, waiting through `scheduler`.
///
/// Returns `Ok(Some(value))` on success and `Ok(None)` when disabled mode
/// suppressed a retryable failure.
pub async fn execute<F, Fut, T, E>(
    operation: F,
    config: &RetryConfiguration,
    scheduler: &dyn Scheduler,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    run(operation, config, scheduler, None, |_| {}, render_display).await
}

/// Like [`execute`], classifying the error together with its `source()`
/// chain (see [`classifier::stringify_error`]).
pub async fn execute_chained<F, Fut, T, E>(
    operation: F,
    config: &RetryConfiguration,
    scheduler: &dyn Scheduler,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + 'static,
{
    run(operation, config, scheduler, None, |_| {}, |err: &E| {
        classifier::stringify_error(err)
    })
    .await
}

/// Like [`execute`], reporting each retry to `status_cb` before waiting.
pub async fn execute_with_status<F, Fut, T, E, StatusCb>(
    operation: F,
    config: &RetryConfiguration,
    scheduler: &dyn Scheduler,
    status_cb: StatusCb,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
    StatusCb: FnMut(RetryStatus),
{
    run(operation, config, scheduler, None, status_cb, render_display).await
}

/// Like [`execute_with_status`], aborting when `cancel` fires.
///
/// The token is checked before every attempt (including the first) and
/// raced against every wait. An attempt already in flight is not
/// interrupted.
///
/// # Example
/// ```ignore
/// let cancel = CancellationToken::new();
/// let result = execute_cancellable(
///     || async { evaluate_in_renderer().await },
///     &config,
///     &TimerScheduler,
///     &cancel,
///     |status| tracing::info!("retry attempt {}: {}", status.attempt, status.reason),
/// )
/// .await;
/// ```
pub async fn execute_cancellable<F, Fut, T, E, StatusCb>(
    operation: F,
    config: &RetryConfiguration,
    scheduler: &dyn Scheduler,
    cancel: &CancellationToken,
    status_cb: StatusCb,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
    StatusCb: FnMut(RetryStatus),
{
    run(
        operation,
        config,
        scheduler,
        Some(cancel),
        status_cb,
        render_display,
    )
    .await
}

fn render_display<E: fmt::Display>(err: &E) -> String {
    classifier::stringify(err)
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

async fn run<F, Fut, T, E, StatusCb, Render>(
    mut operation: F,
    config: &RetryConfiguration,
    scheduler: &dyn Scheduler,
    cancel: Option<&CancellationToken>,
    mut status_cb: StatusCb,
    render: Render,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    StatusCb: FnMut(RetryStatus),
    Render: Fn(&E) -> String,
{
    let mut invocation = RetryInvocation::new(config);

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(RetryError::Aborted);
        }

        // The wait after the previous failure may have crossed the deadline.
        if invocation.attempts > 0 && invocation.timed_out() {
            return Err(invocation.timeout_error());
        }

        invocation.attempts = invocation.attempts.saturating_add(1);
        tracing::trace!(attempt = invocation.attempts, "retry attempt");

        // `err` ends here; only its text is held across the wait.
        let failure = match operation().await {
            Ok(value) => return Ok(Some(value)),
            Err(err) => {
                let failure = render(&err);
                if !config.error_match.is_match(&failure) {
                    tracing::debug!(
                        attempt = invocation.attempts,
                        error = %failure,
                        "non-retryable failure, propagating"
                    );
                    return Err(RetryError::Fatal(err));
                }
                failure
            }
        };

        if config.disabled {
            tracing::debug!(error = %failure, "retry disabled, suppressing retryable failure");
            return Ok(None);
        }

        let elapsed = invocation.started.elapsed();
        tracing::debug!(
            attempt = invocation.attempts,
            elapsed_ms = elapsed_ms(elapsed),
            error = %failure,
            "retryable failure"
        );
        invocation.last_failure = Some(failure);

        if invocation.timed_out() {
            return Err(invocation.timeout_error());
        }

        let sleep = config.poll_interval;
        let resume_at = match sleep {
            PollInterval::Fixed(duration) => Some(Instant::now() + duration),
            PollInterval::NextTick => None,
        };
        status_cb(RetryStatus {
            attempt: invocation.attempts,
            elapsed,
            sleep,
            resume_at,
            last_failure: invocation.last_failure.clone().unwrap_or_default(),
            reason: format!(
                "Transient error: {}, retrying after {sleep:?}",
                invocation.last_failure.as_deref().unwrap_or_default()
            ),
        });

        match cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = scheduler.wait(sleep) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Aborted),
                }
            }
            None => scheduler.wait(sleep).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorMatch;
    use crate::config::RetryOptions;
    use crate::scheduler::TimerScheduler;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error, PartialEq)]
    enum TestError {
        #[error("Protocol error: Execution context was destroyed")]
        Transient,
        #[error("TypeError: {0}")]
        Application(String),
    }

    fn config(options: RetryOptions) -> RetryConfiguration {
        RetryConfiguration::default().merged(&options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success() {
        let calls = AtomicU32::new(0);

        let result = execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            },
            &RetryConfiguration::default(),
            &TimerScheduler,
        )
        .await;

        assert_eq!(result.unwrap(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Should only call once on success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_runs_with_zero_timeout() {
        let calls = AtomicU32::new(0);

        let result = execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            },
            &config(RetryOptions::new().timeout_ms(0)),
            &TimerScheduler,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Timeout { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_matching_error_wins_over_disabled() {
        let calls = AtomicU32::new(0);

        let result = execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Application("x is undefined".to_string()))
            },
            &config(RetryOptions::new().disabled(true)),
            &TimerScheduler,
        )
        .await;

        assert_eq!(
            result.unwrap_err().into_fatal(),
            Some(TestError::Application("x is undefined".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_crossing_deadline_times_out_without_another_attempt() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            },
            &config(RetryOptions::new().timeout_ms(50).poll_ms(200)),
            &TimerScheduler,
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Execution context was destroyed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_callback_per_retry() {
        let calls = AtomicU32::new(0);
        let statuses = Mutex::new(Vec::new());

        let result = execute_with_status(
            || async {
                let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok("ready")
                }
            },
            &config(RetryOptions::new().poll_ms(10)),
            &TimerScheduler,
            |status| statuses.lock().unwrap().push(status),
        )
        .await;

        assert_eq!(result.unwrap(), Some("ready"));
        let recorded = statuses.lock().unwrap();
        assert_eq!(
            recorded.iter().map(|s| s.attempt).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(recorded[0].sleep, PollInterval::from_millis(10));
        assert!(recorded[0].resume_at.is_some());
        assert!(recorded[1].last_failure.contains("Execution context was destroyed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_aborted_before_first_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = execute_cancellable(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(1)
            },
            &RetryConfiguration::default(),
            &TimerScheduler,
            &cancel,
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted)));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "Should not call when cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_aborts_during_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let counter = calls.clone();
        let result = execute_cancellable(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                }
            },
            &config(RetryOptions::new().timeout_ms(10_000).poll_ms(100)),
            &TimerScheduler,
            &cancel,
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted)));
        // attempts at 0, 100 and 200ms; cancelled while waiting for 300ms
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_match_drives_retry() {
        let calls = AtomicU32::new(0);
        let pattern = ErrorMatch::pattern(r"context was \w+").unwrap();

        let result = execute(
            || async {
                let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if current == 1 { Err(TestError::Transient) } else { Ok(current) }
            },
            &config(RetryOptions::new().error_match(pattern).poll_ms(5)),
            &TimerScheduler,
        )
        .await;

        assert_eq!(result.unwrap(), Some(2));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("evaluating window title failed")]
    struct EvalError {
        #[source]
        source: TestError,
    }

    #[tokio::test(start_paused = true)]
    async fn test_chained_classifies_source_chain() {
        let calls = AtomicU32::new(0);

        let result = execute_chained(
            || async {
                let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err(EvalError {
                        source: TestError::Transient,
                    })
                } else {
                    Ok(current)
                }
            },
            &config(RetryOptions::new().poll_ms(5)),
            &TimerScheduler,
        )
        .await;

        assert_eq!(result.unwrap(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_only_ignores_source_chain() {
        let calls = AtomicU32::new(0);

        let result = execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EvalError {
                    source: TestError::Transient,
                })
            },
            &RetryConfiguration::default(),
            &TimerScheduler,
        )
        .await;

        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct LocalError(std::rc::Rc<str>);

    impl fmt::Display for LocalError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test(start_paused = true)]
    async fn test_future_is_send_for_non_send_error() {
        let config = config(RetryOptions::new().poll_ms(5));
        let calls = AtomicU32::new(0);

        let retrying = execute(
            || async {
                let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 2 {
                    Err(LocalError("Promise was collected".into()))
                } else {
                    Ok(current)
                }
            },
            &config,
            &TimerScheduler,
        );
        assert_send(&retrying);

        assert_eq!(retrying.await.unwrap(), Some(2));
    }

    #[test]
    fn test_elapsed_ms_saturates() {
        assert_eq!(elapsed_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(elapsed_ms(Duration::MAX), u64::MAX);
    }
}
