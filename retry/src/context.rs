//! Configuration handles and the process-global retry context
//!
//! A [`RetryContext`] owns one live [`RetryConfiguration`] plus the
//! [`Scheduler`] used for waiting. Reads always hand out copies; writes are
//! whole-field, last-write-wins. Test harnesses that want isolation create
//! their own context; the free functions in this module operate on the
//! lazily created global one.

use crate::config::{PollOptions, RetryConfiguration, RetryOptions};
use crate::error::Result;
use crate::poll::{self, Truthy};
use crate::scheduler::{Scheduler, TimerScheduler};
use crate::strategy::{self, RetryStatus};
use once_cell::sync::Lazy;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

static GLOBAL: Lazy<RetryContext> = Lazy::new(RetryContext::new);

/// Shared retry configuration plus scheduler
#[derive(Clone)]
pub struct RetryContext {
    config: Arc<RwLock<RetryConfiguration>>,
    scheduler: Arc<dyn Scheduler>,
}

impl fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("config", &self.configuration())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryContext {
    /// Context with default configuration and [`TimerScheduler`].
    pub fn new() -> Self {
        Self::with_configuration(RetryConfiguration::default())
    }

    pub fn with_configuration(config: RetryConfiguration) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            scheduler: Arc::new(TimerScheduler),
        }
    }

    /// Replace the scheduler. Clones taken earlier keep sharing the
    /// configuration with the returned context.
    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Snapshot of the live configuration.
    pub fn configuration(&self) -> RetryConfiguration {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shallow-merge `options` into the live configuration.
    pub fn set_configuration(&self, options: RetryOptions) -> RetryConfiguration {
        let mut live = self.config.write().unwrap_or_else(PoisonError::into_inner);
        live.apply(&options);
        tracing::debug!(config = ?*live, "retry configuration updated");
        live.clone()
    }

    pub fn replace_configuration(&self, config: RetryConfiguration) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Restore the hard-coded defaults.
    pub fn reset_configuration(&self) {
        self.replace_configuration(RetryConfiguration::default());
    }

    /// Apply `options` until the returned guard is dropped.
    ///
    /// The guard restores the configuration that was live when it was
    /// created, discarding any writes made in between.
    pub fn with_overrides(&self, options: RetryOptions) -> OverrideGuard {
        let previous = self.configuration();
        self.set_configuration(options);
        OverrideGuard {
            context: self.clone(),
            previous: Some(previous),
        }
    }

    /// Retry `operation` under the live configuration overlaid with `options`.
    ///
    /// Resolves to `Ok(None)` only when disabled mode suppressed a
    /// retryable failure.
    ///
    /// The failure is classified by its `Display` text only. An `anyhow`
    /// context or a `#[source]` wrapper hides the underlying message; use
    /// [`RetryContext::retry_chained`] for errors implementing
    /// `std::error::Error`.
    pub async fn retry<F, Fut, T, E>(
        &self,
        operation: F,
        options: RetryOptions,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let config = self.configuration().merged(&options);
        strategy::execute(operation, &config, self.scheduler.as_ref()).await
    }

    /// [`RetryContext::retry`] for errors that wrap the transient failure
    /// as a `source()`: the whole chain is matched against `error_match`.
    pub async fn retry_chained<F, Fut, T, E>(
        &self,
        operation: F,
        options: RetryOptions,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let config = self.configuration().merged(&options);
        strategy::execute_chained(operation, &config, self.scheduler.as_ref()).await
    }

    /// [`RetryContext::retry`] with a progress callback before every wait.
    pub async fn retry_with_status<F, Fut, T, E, StatusCb>(
        &self,
        operation: F,
        options: RetryOptions,
        status_cb: StatusCb,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
        StatusCb: FnMut(RetryStatus),
    {
        let config = self.configuration().merged(&options);
        strategy::execute_with_status(operation, &config, self.scheduler.as_ref(), status_cb).await
    }

    /// [`RetryContext::retry_with_status`] that stops with
    /// [`RetryError::Aborted`](crate::RetryError::Aborted) once `cancel` fires.
    pub async fn retry_cancellable<F, Fut, T, E, StatusCb>(
        &self,
        operation: F,
        options: RetryOptions,
        cancel: &CancellationToken,
        status_cb: StatusCb,
    ) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
        StatusCb: FnMut(RetryStatus),
    {
        let config = self.configuration().merged(&options);
        strategy::execute_cancellable(
            operation,
            &config,
            self.scheduler.as_ref(),
            cancel,
            status_cb,
        )
        .await
    }

    /// Poll `operation` until it resolves truthy.
    pub async fn retry_until_truthy<F, Fut, T, E>(
        &self,
        operation: F,
        options: PollOptions,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Truthy,
        E: fmt::Display,
    {
        poll::until_truthy(
            operation,
            &options,
            || self.configuration(),
            self.scheduler.as_ref(),
        )
        .await
    }
}

/// Restores a [`RetryContext`]'s configuration on drop.
#[must_use = "the overrides are reverted as soon as the guard is dropped"]
pub struct OverrideGuard {
    context: RetryContext,
    previous: Option<RetryConfiguration>,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.context.replace_configuration(previous);
        }
    }
}

/// The process-global context.
pub fn global() -> &'static RetryContext {
    &GLOBAL
}

/// Snapshot of the global configuration.
pub fn get_configuration() -> RetryConfiguration {
    global().configuration()
}

/// Shallow-merge `options` into the global configuration.
pub fn set_configuration(options: RetryOptions) -> RetryConfiguration {
    global().set_configuration(options)
}

pub fn reset_configuration() {
    global().reset_configuration();
}

/// Retry `operation` under the global configuration overlaid with `options`.
pub async fn retry<F, Fut, T, E>(operation: F, options: RetryOptions) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    global().retry(operation, options).await
}

/// [`retry`] matching the error's whole `source()` chain.
pub async fn retry_chained<F, Fut, T, E>(
    operation: F,
    options: RetryOptions,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + 'static,
{
    global().retry_chained(operation, options).await
}

/// Poll `operation` until truthy under the global configuration.
pub async fn retry_until_truthy<F, Fut, T, E>(operation: F, options: PollOptions) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    T: Truthy,
    E: fmt::Display,
{
    global().retry_until_truthy(operation, options).await
}
