use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::balancer::{BalancedItem, LoadBalancer};
use crate::error::ClassifyError;

/// Capacity policy applied when dispatching a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CallMode {
    /// No capacity bookkeeping; always calls the current head.
    Unchecked,
    /// Unconditionally claims capacity (overdraft allowed), then calls.
    Greedy,
    /// Claims capacity only when available, rotating across the pool and
    /// sleeping for the shortest estimated wait. Never overdrafts unless
    /// `force_call` is set.
    Courteous,
}

/// Per-call dispatch parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallContext {
    pub mode: CallMode,
    /// Retry budget per item; failover resets it.
    pub max_retries: u32,
    /// Tokens claimed per invocation.
    pub call_weight: u32,
    /// Claim attempts before the courteous selector gives up (or overdrafts
    /// under `force_call`).
    pub max_try_claim: u32,
    /// Overdraft the last selection instead of returning `None` when the
    /// courteous selector exhausts its attempts.
    pub force_call: bool,
    /// Sample call latencies into the item's EWMA.
    pub measure_call_time: bool,
    /// Token floor a `try_claim` may not dip under. Negative values grant a
    /// burst allowance.
    pub min_capacity: f64,
}

impl Default for CallContext {
    fn default() -> Self {
        Self {
            mode: CallMode::Courteous,
            max_retries: 7,
            call_weight: 1,
            max_try_claim: 3,
            force_call: false,
            measure_call_time: false,
            min_capacity: 0.0,
        }
    }
}

impl CallContext {
    pub fn courteous() -> Self {
        Self::default()
    }

    pub fn greedy() -> Self {
        Self {
            mode: CallMode::Greedy,
            ..Self::default()
        }
    }

    pub fn unchecked() -> Self {
        Self {
            mode: CallMode::Unchecked,
            ..Self::default()
        }
    }
}

impl<T: Clone> LoadBalancer<T> {
    /// Executes `op` against the best backend, retrying and failing over per
    /// the call context.
    ///
    /// Returns `Ok(None)` only in courteous mode without `force_call`, when
    /// every claim attempt failed: the caller interprets it as "no
    /// capacity". A fatal error class, or a per-item error count above
    /// `max_retries`, propagates the underlying error unchanged;
    /// `log_context` identifies the call site in the emitted diagnostics.
    ///
    /// Cancellation is honored at the await points (the operation future,
    /// backoff sleeps, capacity sleeps): dropping the returned future stops
    /// the dispatch there.
    pub async fn call<R, E, F, Fut>(
        &self,
        ctx: &CallContext,
        log_context: &str,
        op: F,
    ) -> Result<Option<R>, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: ClassifyError + std::fmt::Display,
    {
        let mut selected = match self.dispatch_once(ctx).await {
            Some(item) => item,
            None => return Ok(None),
        };
        let num_items = self.len() as u32;
        let mut start = ctx.measure_call_time.then(Instant::now);
        let mut error_count: u32 = 0;
        let mut retry: u32 = 0;
        loop {
            match op(selected.item().clone()).await {
                Ok(result) => {
                    if let Some(started_at) = start {
                        selected.sample(started_at.elapsed());
                    }
                    selected.on_success();
                    return Ok(Some(result));
                }
                Err(err) => {
                    error_count += 1;
                    let advice = selected.on_error(error_count, err.classify());
                    self.sort();
                    if advice.is_give_up() || error_count > ctx.max_retries {
                        error!(
                            context = log_context,
                            error = %err,
                            errors = error_count,
                            "giving up on balanced call"
                        );
                        return Err(err);
                    }
                    retry += 1;
                    if retry < num_items && !Arc::ptr_eq(&self.peek(), &selected) {
                        // rotate to the next item and reset its retry budget
                        error_count = retry - 1;
                        warn!(
                            context = log_context,
                            error = %err,
                            "failing over to next item"
                        );
                    } else if let Some(delay) = advice.delay() {
                        warn!(
                            context = log_context,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    selected = match self.dispatch_once(ctx).await {
                        Some(item) => item,
                        None => return Ok(None),
                    };
                    if start.is_some() {
                        start = Some(Instant::now());
                    }
                }
            }
        }
    }

    async fn dispatch_once(&self, ctx: &CallContext) -> Option<Arc<BalancedItem<T>>> {
        match ctx.mode {
            CallMode::Unchecked => Some(self.with_context()),
            CallMode::Greedy => {
                let item = self.with_context();
                item.capacity().claim(ctx, ctx.call_weight);
                Some(item)
            }
            CallMode::Courteous => self.select_courteous(ctx).await,
        }
    }

    /// The courteous selection loop: try to claim the head, rotate to any
    /// peer with spare capacity, otherwise wait out the shortest estimated
    /// delay. After `max_try_claim` rounds, either overdraft (`force_call`)
    /// or report no capacity.
    async fn select_courteous(&self, ctx: &CallContext) -> Option<Arc<BalancedItem<T>>> {
        let weight = ctx.call_weight;
        let mut selected = self.with_context();
        'try_next: for _ in 0..ctx.max_try_claim {
            if selected.capacity().try_claim(ctx, weight) {
                return Some(selected);
            }
            if self.len() > 1 {
                self.sort();
                let previous = selected;
                selected = self.with_context();
                if !Arc::ptr_eq(&selected, &previous)
                    && selected.capacity().has_capacity(ctx, weight)
                {
                    continue 'try_next;
                }
                for item in self.items() {
                    if !Arc::ptr_eq(&item, &previous) && item.capacity().has_capacity(ctx, weight)
                    {
                        selected = item;
                        continue 'try_next;
                    }
                }
            }
            let delay = selected.capacity().duration_until(ctx, weight);
            if delay.is_zero() {
                selected.capacity().claim(ctx, weight);
                return Some(selected);
            }
            // a backend that never refills reports an unbounded wait; no
            // amount of sleeping satisfies the claim, so resolve via
            // force_call or no-capacity instead
            if delay == Duration::MAX {
                break;
            }
            tokio::time::sleep(delay).await;
            self.sort();
            selected = self.with_context();
        }
        if ctx.force_call {
            selected.capacity().claim(ctx, ctx.call_weight);
            Some(selected)
        } else {
            None
        }
    }
}
