//! Retry and polling primitives for end-to-end tests of desktop applications.
//!
//! Remote evaluation inside an application under test is intrinsically
//! flaky: the execution context can be torn down mid-call for reasons the
//! test does not control. Every helper that performs a remote call wraps it
//! in [`retry`], and every helper that waits on application state wraps its
//! check in [`retry_until_truthy`].
//!
//! This crate provides:
//! - Error classification by substring or pattern ([`ErrorMatch`])
//! - A retry engine with timeout, poll interval and disabled mode
//! - A two-level poll-until-truthy engine
//! - Process-global configuration plus independent [`RetryContext`] handles
//! - Layered configuration loading (defaults, TOML file, `E2E_RETRY_*` env)
//!
//! # Example
//!
//! ```no_run
//! use e2e_retry::{RetryOptions, retry};
//!
//! # async fn evaluate_title() -> Result<String, std::io::Error> { Ok(String::new()) }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let title = retry(evaluate_title, RetryOptions::new().timeout_ms(2_000)).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod poll;
pub mod scheduler;
pub mod strategy;

pub use classifier::{ErrorMatch, matches, stringify, stringify_error, stringify_value};
pub use config::{PollInterval, PollOptions, RetryConfiguration, RetryOptions};
pub use context::{
    OverrideGuard, RetryContext, get_configuration, global, reset_configuration, retry,
    retry_chained, retry_until_truthy, set_configuration,
};
pub use error::{Result, RetryError};
pub use poll::Truthy;
pub use scheduler::{FrameScheduler, Scheduler, TimerScheduler};
pub use strategy::RetryStatus;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
