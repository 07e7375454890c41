//! Retry configuration types
//!
//! [`RetryConfiguration`] is the complete, effective configuration.
//! [`RetryOptions`] is a partial configuration: unset fields inherit from
//! whatever it is applied on top of (shallow merge, set fields win).
//!
//! Layered loading from a file and `E2E_RETRY_*` environment variables
//! lives in [`loader`].

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;

use crate::classifier::ErrorMatch;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_TRUTHY_POLL_INTERVAL_MS: u64 = 100;
/// Wait used for [`PollInterval::NextTick`] when no frame clock exists.
pub const NEXT_TICK_FALLBACK: Duration = Duration::from_millis(20);

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PollIntervalRepr", into = "PollIntervalRepr")]
pub enum PollInterval {
    Fixed(Duration),
    /// Wait for the scheduler's next frame, or [`NEXT_TICK_FALLBACK`].
    NextTick,
}

impl PollInterval {
    pub const fn from_millis(ms: u64) -> Self {
        PollInterval::Fixed(Duration::from_millis(ms))
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        PollInterval::from_millis(DEFAULT_POLL_INTERVAL_MS)
    }
}

impl From<Duration> for PollInterval {
    fn from(duration: Duration) -> Self {
        PollInterval::Fixed(duration)
    }
}

/// On-disk form: milliseconds, or `"next-tick"` (alias `"raf"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PollIntervalRepr {
    Millis(u64),
    Named(String),
}

impl TryFrom<PollIntervalRepr> for PollInterval {
    type Error = String;

    fn try_from(repr: PollIntervalRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            PollIntervalRepr::Millis(ms) => Ok(PollInterval::from_millis(ms)),
            PollIntervalRepr::Named(name) => match name.trim().to_ascii_lowercase().as_str() {
                "next-tick" | "next_tick" | "raf" => Ok(PollInterval::NextTick),
                other => other
                    .parse::<u64>()
                    .map(PollInterval::from_millis)
                    .map_err(|_| format!("invalid poll interval '{name}'")),
            },
        }
    }
}

impl From<PollInterval> for PollIntervalRepr {
    fn from(value: PollInterval) -> Self {
        match value {
            PollInterval::Fixed(duration) => {
                PollIntervalRepr::Millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            PollInterval::NextTick => PollIntervalRepr::Named("next-tick".to_string()),
        }
    }
}

/// Effective retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfiguration {
    /// Give up once this much time has passed since the first attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between attempts
    #[serde(default)]
    pub poll_interval: PollInterval,

    /// Failures matching this are retried; all others propagate immediately
    #[serde(default)]
    pub error_match: ErrorMatch,

    /// At most one attempt; a retryable failure yields an absent result
    #[serde(default)]
    pub disabled: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval: PollInterval::default(),
            error_match: ErrorMatch::default(),
            disabled: false,
        }
    }
}

impl RetryConfiguration {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Shallow-merge `options` into `self`.
    pub fn apply(&mut self, options: &RetryOptions) {
        if let Some(timeout_ms) = options.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(poll_interval) = options.poll_interval {
            self.poll_interval = poll_interval;
        }
        if let Some(error_match) = &options.error_match {
            self.error_match = error_match.clone();
        }
        if let Some(disabled) = options.disabled {
            self.disabled = disabled;
        }
    }

    /// Copy of `self` with `options` overlaid.
    pub fn merged(&self, options: &RetryOptions) -> Self {
        let mut merged = self.clone();
        merged.apply(options);
        merged
    }
}

/// Partial [`RetryConfiguration`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<PollInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_match: Option<ErrorMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn poll_interval(mut self, interval: impl Into<PollInterval>) -> Self {
        self.poll_interval = Some(interval.into());
        self
    }

    pub fn poll_ms(self, ms: u64) -> Self {
        self.poll_interval(PollInterval::from_millis(ms))
    }

    pub fn error_match(mut self, pattern: impl Into<ErrorMatch>) -> Self {
        self.error_match = Some(pattern.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl From<RetryConfiguration> for RetryOptions {
    fn from(config: RetryConfiguration) -> Self {
        Self {
            timeout_ms: Some(config.timeout_ms),
            poll_interval: Some(config.poll_interval),
            error_match: Some(config.error_match),
            disabled: Some(config.disabled),
        }
    }
}

/// Options for [`crate::retry_until_truthy`]
///
/// `timeout_ms` and `poll_interval` bound the outer falsy-polling loop;
/// `retry` is passed through to every inner [`crate::retry`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOptions {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_truthy_poll_interval")]
    pub poll_interval: PollInterval,
    #[serde(default)]
    pub retry: RetryOptions,
}

fn default_truthy_poll_interval() -> PollInterval {
    PollInterval::from_millis(DEFAULT_TRUTHY_POLL_INTERVAL_MS)
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval: default_truthy_poll_interval(),
            retry: RetryOptions::default(),
        }
    }
}

impl PollOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn poll_interval(mut self, interval: impl Into<PollInterval>) -> Self {
        self.poll_interval = interval.into();
        self
    }

    pub fn poll_ms(self, ms: u64) -> Self {
        self.poll_interval(PollInterval::from_millis(ms))
    }

    pub fn retry(mut self, options: RetryOptions) -> Self {
        self.retry = options;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
