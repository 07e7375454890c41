//! Poll until truthy
//!
//! Two failure domains, two cadences: a transient failure of the remote
//! call is retried by the inner [`crate::strategy`] loop at its own poll
//! interval, while a resolved-but-falsy result ("not ready yet") goes back
//! to the outer loop, which waits [`PollOptions::poll_interval`] and asks
//! again until [`PollOptions::timeout_ms`] runs out.

use crate::config::{PollOptions, RetryConfiguration};
use crate::error::{Result, RetryError};
use crate::scheduler::Scheduler;
use crate::strategy;
use std::fmt;
use std::future::Future;
use tokio::time::Instant;

/// Whether a resolved value counts as "ready".
///
/// Mirrors JavaScript truthiness where a Rust type has an obvious
/// counterpart. Collections are truthy when non-empty.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl Truthy for () {
    fn is_truthy(&self) -> bool {
        false
    }
}

macro_rules! impl_truthy_int {
    ($($ty:ty),*) => {
        $(impl Truthy for $ty {
            fn is_truthy(&self) -> bool {
                *self != 0
            }
        })*
    };
}

impl_truthy_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Truthy for f32 {
    fn is_truthy(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
}

impl Truthy for f64 {
    fn is_truthy(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
}

impl Truthy for str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Truthy> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.as_ref().is_some_and(Truthy::is_truthy)
    }
}

impl<T: Truthy + ?Sized> Truthy for &T {
    fn is_truthy(&self) -> bool {
        (**self).is_truthy()
    }
}

impl<T: Truthy + ?Sized> Truthy for Box<T> {
    fn is_truthy(&self) -> bool {
        (**self).is_truthy()
    }
}

/// JavaScript semantics: objects and arrays are always truthy.
impl Truthy for serde_json::Value {
    fn is_truthy(&self) -> bool {
        use serde_json::Value;
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

/// Call the retry engine with `operation` until it resolves truthy or
/// `options.timeout_ms` elapses.
///
/// `live_config` is read before every poll, so each inner retry sees
/// configuration writes made while polling. Fatal failures and inner retry
/// timeouts propagate immediately. A suppressed result (disabled mode)
/// counts as falsy.
pub async fn until_truthy<F, Fut, T, E, C>(
    mut operation: F,
    options: &PollOptions,
    live_config: C,
    scheduler: &dyn Scheduler,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    T: Truthy,
    E: fmt::Display,
    C: Fn() -> RetryConfiguration,
{
    let deadline = Instant::now() + options.timeout();
    let mut polls: u32 = 0;

    while Instant::now() < deadline {
        polls = polls.saturating_add(1);
        let retry_config = live_config().merged(&options.retry);
        if let Some(value) = strategy::execute(&mut operation, &retry_config, scheduler).await?
            && value.is_truthy()
        {
            return Ok(value);
        }
        tracing::trace!(poll = polls, "result not truthy yet");
        scheduler.wait(options.poll_interval).await;
    }

    tracing::debug!(
        timeout_ms = options.timeout_ms,
        polls,
        "gave up waiting for a truthy result"
    );
    Err(RetryError::PollTimeout {
        timeout_ms: options.timeout_ms,
        polls,
    })
}
