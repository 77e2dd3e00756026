//! Inter-row delay gate for bulk imports.

use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Waited on once before every row submission.
#[async_trait]
pub trait Throttle: Send {
    async fn wait(&mut self);
}

/// No delay at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThrottle;

#[async_trait]
impl Throttle for NoThrottle {
    async fn wait(&mut self) {}
}

/// Fixed-period gate: the first wait passes immediately, every later one waits for the next
/// slot, so `n` submissions span at least `(n - 1) * period`.
#[derive(Debug)]
pub struct IntervalThrottle {
    interval: Interval,
}

impl IntervalThrottle {
    /// Create the gate. Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Gate for a millisecond setting; non-positive values disable throttling.
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        u64::try_from(millis)
            .ok()
            .filter(|millis| *millis > 0)
            .map(|millis| Self::new(Duration::from_millis(millis)))
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Throttle for IntervalThrottle {
    async fn wait(&mut self) {
        self.interval.tick().await;
    }
}

#[async_trait]
impl<T: Throttle + ?Sized> Throttle for Box<T> {
    async fn wait(&mut self) {
        (**self).wait().await;
    }
}

/// Throttle for a millisecond setting, boxed so callers need not care which kind they got.
#[must_use]
pub fn from_millis(millis: i64) -> Box<dyn Throttle> {
    match IntervalThrottle::from_millis(millis) {
        Some(throttle) => {
            debug!("Throttling submissions to one every {millis}ms");
            Box::new(throttle)
        }
        None => Box::new(NoThrottle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_non_positive_disables() {
        assert!(IntervalThrottle::from_millis(-1).is_none());
        assert!(IntervalThrottle::from_millis(0).is_none());
        assert_eq!(
            IntervalThrottle::from_millis(250).map(|t| t.period()),
            Some(Duration::from_millis(250))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_spacing() {
        let mut throttle = IntervalThrottle::new(Duration::from_millis(500));
        let start = Instant::now();

        for _ in 0..3 {
            throttle.wait().await;
        }

        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_throttle_does_not_wait() {
        let mut throttle = from_millis(-1);
        let start = Instant::now();

        for _ in 0..5 {
            throttle.wait().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
