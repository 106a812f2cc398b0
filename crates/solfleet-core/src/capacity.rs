use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::call::CallContext;
use crate::error::ErrorClass;

/// Configuration for a backend's capacity budget.
///
/// Uses a token bucket with lazy refill: elapsed time is converted to tokens
/// on every capacity query, capped at `max_tokens`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CapacityConfig {
    /// Bucket ceiling (maximum burst).
    pub max_tokens: u32,
    /// Sustained refill rate in tokens per second.
    pub refill_per_second: f64,
    /// Extra tokens deducted when the remote reports rate limiting.
    pub rate_limited_penalty: f64,
    /// Number of recent call outcomes kept for the health estimate.
    pub error_window: usize,
    /// Items whose health drops below this are skipped by the balancer.
    pub min_health_for_selection: f64,
}

impl CapacityConfig {
    /// Creates a configuration with an explicit bucket size and refill rate.
    pub fn new(max_tokens: u32, refill_per_second: f64) -> Self {
        Self {
            max_tokens,
            refill_per_second,
            rate_limited_penalty: 1.0,
            error_window: 64,
            min_health_for_selection: 0.0,
        }
    }

    /// Creates a configuration for a sustained requests-per-second limit,
    /// with a burst of 2x the rate.
    pub fn per_second(rps: f64) -> Self {
        let max_tokens = (rps * 2.0).ceil() as u32;
        Self::new(max_tokens, rps)
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self::per_second(10.0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, config: &CapacityConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = elapsed.as_secs_f64() * config.refill_per_second;
        self.tokens = (self.tokens + refilled).min(config.max_tokens as f64);
        self.last_refill = now;
    }
}

/// Sliding window of recent call outcomes.
#[derive(Debug)]
struct ErrorTracker {
    window: VecDeque<bool>,
    capacity: usize,
    errors: usize,
}

impl ErrorTracker {
    fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            errors: 0,
        }
    }

    fn record(&mut self, ok: bool) {
        if self.window.len() == self.capacity {
            if let Some(evicted_ok) = self.window.pop_front() {
                if !evicted_ok {
                    self.errors -= 1;
                }
            }
        }
        self.window.push_back(ok);
        if !ok {
            self.errors += 1;
        }
    }

    fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.errors as f64 / self.window.len() as f64
        }
    }
}

/// Per-backend capacity monitor: a token bucket plus an outcome tracker.
///
/// `try_claim` and `claim` are linearizable; each runs as a single critical
/// section on the bucket. Callers must pair every invocation of the remote
/// with exactly one successful `try_claim` or one `claim`, and report the
/// outcome through `on_success`/`on_error`.
#[derive(Debug)]
pub struct CapacityState {
    config: CapacityConfig,
    bucket: Mutex<Bucket>,
    tracker: Mutex<ErrorTracker>,
}

impl CapacityState {
    pub fn new(config: CapacityConfig) -> Self {
        let bucket = Bucket {
            tokens: config.max_tokens as f64,
            last_refill: Instant::now(),
        };
        let tracker = ErrorTracker::new(config.error_window);
        Self {
            config,
            bucket: Mutex::new(bucket),
            tracker: Mutex::new(tracker),
        }
    }

    pub fn config(&self) -> &CapacityConfig {
        &self.config
    }

    /// Atomically deducts `weight` tokens if the bucket holds enough given
    /// the context's floor. Returns false without mutation otherwise.
    pub fn try_claim(&self, ctx: &CallContext, weight: u32) -> bool {
        self.try_claim_at(ctx, weight, Instant::now())
    }

    /// Unconditionally deducts `weight` tokens. The bucket may go negative
    /// (overdraft), which pushes the availability estimate forward.
    pub fn claim(&self, _ctx: &CallContext, weight: u32) {
        self.claim_at(weight, Instant::now())
    }

    /// Non-mutating capacity check.
    pub fn has_capacity(&self, ctx: &CallContext, weight: u32) -> bool {
        self.has_capacity_at(ctx, weight, Instant::now())
    }

    /// Estimated wait until a claim of `weight` would succeed. Zero means
    /// "now".
    pub fn duration_until(&self, ctx: &CallContext, weight: u32) -> Duration {
        self.duration_until_at(ctx, weight, Instant::now())
    }

    /// Current token balance, after lazy refill. Negative while in
    /// overdraft.
    pub fn tokens(&self) -> f64 {
        let mut bucket = self.lock_bucket();
        bucket.refill(&self.config, Instant::now());
        bucket.tokens
    }

    pub fn on_success(&self) {
        self.lock_tracker().record(true);
    }

    /// Records a failed outcome. Rate-limited errors additionally burn
    /// `rate_limited_penalty` tokens so the item sorts behind its peers
    /// until the remote cools off.
    pub fn on_error(&self, class: ErrorClass) {
        self.lock_tracker().record(false);
        if class == ErrorClass::RateLimited {
            let mut bucket = self.lock_bucket();
            bucket.refill(&self.config, Instant::now());
            bucket.tokens -= self.config.rate_limited_penalty;
        }
    }

    pub fn error_rate(&self) -> f64 {
        self.lock_tracker().error_rate()
    }

    /// Health score in [0, 1]: `1 - error_rate` over the sliding window.
    pub fn health(&self) -> f64 {
        1.0 - self.error_rate()
    }

    pub(crate) fn try_claim_at(&self, ctx: &CallContext, weight: u32, now: Instant) -> bool {
        let mut bucket = self.lock_bucket();
        bucket.refill(&self.config, now);
        if bucket.tokens - weight as f64 >= ctx.min_capacity {
            bucket.tokens -= weight as f64;
            true
        } else {
            false
        }
    }

    pub(crate) fn claim_at(&self, weight: u32, now: Instant) {
        let mut bucket = self.lock_bucket();
        bucket.refill(&self.config, now);
        bucket.tokens -= weight as f64;
    }

    pub(crate) fn has_capacity_at(&self, ctx: &CallContext, weight: u32, now: Instant) -> bool {
        let mut bucket = self.lock_bucket();
        bucket.refill(&self.config, now);
        bucket.tokens - weight as f64 >= ctx.min_capacity
    }

    pub(crate) fn duration_until_at(&self, ctx: &CallContext, weight: u32, now: Instant) -> Duration {
        let mut bucket = self.lock_bucket();
        bucket.refill(&self.config, now);
        let needed = ctx.min_capacity + weight as f64 - bucket.tokens;
        if needed <= 0.0 {
            return Duration::ZERO;
        }
        if self.config.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(needed / self.config.refill_per_second)
            .unwrap_or(Duration::MAX)
    }

    fn lock_bucket(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().expect("capacity bucket mutex poisoned")
    }

    fn lock_tracker(&self) -> std::sync::MutexGuard<'_, ErrorTracker> {
        self.tracker.lock().expect("error tracker mutex poisoned")
    }
}
