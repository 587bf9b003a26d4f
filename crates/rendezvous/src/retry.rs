//! Connect backoff and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capped exponential backoff between connect attempts.
///
/// There is no attempt limit: the producer keeps trying until the consumer
/// listens or the [`CancelToken`] is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial.min(self.max),
            policy: *self,
        }
    }
}

/// Infinite iterator of delays produced by a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    policy: RetryPolicy,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current
            .checked_mul(self.policy.multiplier.max(1))
            .unwrap_or(self.policy.max)
            .min(self.policy.max);
        Some(current)
    }
}

/// Shared flag that stops retry and update loops from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `duration` in short slices, returning early (with `false`)
    /// once cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let mut left = duration;
        while !left.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = left.min(SLICE);
            std::thread::sleep(step);
            left -= step;
        }
        !self.is_cancelled()
    }
}
