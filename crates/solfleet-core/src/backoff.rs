use std::time::Duration;

use crate::error::ErrorClass;

/// Verdict returned by an [`ErrorHandler`] for a failed call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    /// Sleep for the given duration, then retry on the same item.
    Delay(Duration),
    /// Retry immediately.
    Immediate,
    /// Give up on this item. The dispatcher fails over or propagates.
    GiveUp,
}

impl RetryAdvice {
    pub fn is_give_up(&self) -> bool {
        matches!(self, RetryAdvice::GiveUp)
    }

    /// The sleep duration, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryAdvice::Delay(d) => Some(*d),
            _ => None,
        }
    }
}

/// Backoff curve applied to consecutive errors on a single item.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BackoffPolicy {
    /// `delay = min(base * error_count, cap)`
    Linear { base: Duration, cap: Duration },
    /// `delay = min(base * 2^(error_count - 1), cap)`, with an optional
    /// jitter of up to 10% of the delay.
    Exponential {
        base: Duration,
        cap: Duration,
        jitter: bool,
    },
}

impl BackoffPolicy {
    fn delay(&self, error_count: u32) -> Duration {
        match self {
            BackoffPolicy::Linear { base, cap } => base
                .saturating_mul(error_count.max(1))
                .min(*cap),
            BackoffPolicy::Exponential { base, cap, jitter } => {
                let exp = error_count.saturating_sub(1).min(31);
                let delay = base.saturating_mul(1u32 << exp).min(*cap);
                if *jitter {
                    delay + jitter_for(delay)
                } else {
                    delay
                }
            }
        }
    }
}

// Up to 10% of the delay, half the time. Avoids thundering herds without
// skewing the average much.
fn jitter_for(delay: Duration) -> Duration {
    let jitter_cap = delay.as_millis() as u64 / 10;
    if jitter_cap > 0 && rand::random::<bool>() {
        Duration::from_millis(rand::random::<u64>() % jitter_cap)
    } else {
        Duration::ZERO
    }
}

/// Per-item error handler: a backoff curve plus the set of error classes
/// that immediately fail the item regardless of retry count.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorHandler {
    pub policy: BackoffPolicy,
    pub fatal_classes: Vec<ErrorClass>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl ErrorHandler {
    /// Linear backoff with the default fatal classes.
    pub fn linear(base: Duration, cap: Duration) -> Self {
        Self {
            policy: BackoffPolicy::Linear { base, cap },
            fatal_classes: vec![ErrorClass::Fatal, ErrorClass::Cancelled],
        }
    }

    /// Exponential backoff with jitter and the default fatal classes.
    pub fn exponential(base: Duration, cap: Duration) -> Self {
        Self {
            policy: BackoffPolicy::Exponential {
                base,
                cap,
                jitter: true,
            },
            fatal_classes: vec![ErrorClass::Fatal, ErrorClass::Cancelled],
        }
    }

    /// Maps the running error count and the error's class to a verdict.
    pub fn advise(&self, error_count: u32, class: ErrorClass) -> RetryAdvice {
        if self.fatal_classes.contains(&class) {
            return RetryAdvice::GiveUp;
        }
        let delay = self.policy.delay(error_count);
        if delay.is_zero() {
            RetryAdvice::Immediate
        } else {
            RetryAdvice::Delay(delay)
        }
    }
}
