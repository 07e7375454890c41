//! Waiting between attempts
//!
//! The engines never sleep directly; they hand a [`PollInterval`] to a
//! [`Scheduler`]. Headless runners use [`TimerScheduler`], where
//! `NextTick` falls back to a short fixed delay. Contexts that render frames
//! use [`FrameScheduler`], which wakes on the next frame boundary.

use crate::config::{NEXT_TICK_FALLBACK, PollInterval};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// 60 Hz
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_nanos(16_666_667);

#[async_trait]
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Suspend until `interval` has passed. Must not block the thread.
    async fn wait(&self, interval: PollInterval);
}

/// Plain tokio timers; `NextTick` waits [`NEXT_TICK_FALLBACK`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerScheduler;

#[async_trait]
impl Scheduler for TimerScheduler {
    async fn wait(&self, interval: PollInterval) {
        match interval {
            PollInterval::Fixed(duration) => sleep_or_yield(duration).await,
            PollInterval::NextTick => tokio::time::sleep(NEXT_TICK_FALLBACK).await,
        }
    }
}

/// Frame-aligned scheduling; `NextTick` wakes on the next frame boundary
/// measured from the scheduler's creation.
#[derive(Debug, Clone, Copy)]
pub struct FrameScheduler {
    period: Duration,
    origin: Instant,
}

impl FrameScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            origin: Instant::now(),
        }
    }

    /// Time left until the next frame boundary after `now`.
    fn until_next_frame(&self, now: Instant) -> Duration {
        let period_nanos = self.period.as_nanos();
        if period_nanos == 0 {
            return Duration::ZERO;
        }
        let into_frame = now.saturating_duration_since(self.origin).as_nanos() % period_nanos;
        let remaining = period_nanos - into_frame;
        Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_PERIOD)
    }
}

#[async_trait]
impl Scheduler for FrameScheduler {
    async fn wait(&self, interval: PollInterval) {
        match interval {
            PollInterval::Fixed(duration) => sleep_or_yield(duration).await,
            PollInterval::NextTick => {
                let now = Instant::now();
                let wait = self.until_next_frame(now);
                if wait.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep_until(now + wait).await;
                }
            }
        }
    }
}

async fn sleep_or_yield(duration: Duration) {
    if duration.is_zero() {
        // still give other tasks a turn between attempts
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}
