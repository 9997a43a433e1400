//! Bounded retry policies.

use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed,
    /// Delay multiplied by the attempt number.
    Linear,
}

/// A bounded number of attempts with a per-attempt delay.
///
/// Running out of attempts is terminal; callers surface it as an error or a
/// degraded report, never silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay.
    pub delay: Duration,
    /// Delay growth.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Linearly growing delay between attempts.
    pub const fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Linear,
        }
    }

    /// Connecting to a freshly started browser: 5 attempts, 100ms apart.
    pub const fn connect() -> Self {
        Self::fixed(5, Duration::from_millis(100))
    }

    /// Confirming container removal: 3 attempts, 250ms, 500ms apart.
    pub const fn removal() -> Self {
        Self::linear(3, Duration::from_millis(250))
    }

    /// Delay associated with a 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay * attempt.max(1),
        }
    }

    /// 1-based attempt numbers.
    pub fn attempts(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.max_attempts
    }
}
