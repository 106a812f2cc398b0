use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::backoff::{ErrorHandler, RetryAdvice};
use crate::capacity::{CapacityConfig, CapacityState};
use crate::error::ErrorClass;

const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// A backend paired with its capacity monitor, error handler, and latency
/// samples.
///
/// Items are shared (`Arc`) between the balancer and in-flight calls;
/// identity is pointer identity.
#[derive(Debug)]
pub struct BalancedItem<T> {
    item: T,
    capacity: CapacityState,
    handler: ErrorHandler,
    index: usize,
    /// EWMA of call latencies in milliseconds, stored as f64 bits. Zero
    /// until the first sample.
    latency_ewma: AtomicU64,
    skip_until: Mutex<Option<Instant>>,
}

impl<T> BalancedItem<T> {
    pub fn new(item: T, capacity: CapacityConfig, handler: ErrorHandler) -> Self {
        Self {
            item,
            capacity: CapacityState::new(capacity),
            handler,
            index: 0,
            latency_ewma: AtomicU64::new(0),
            skip_until: Mutex::new(None),
        }
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn capacity(&self) -> &CapacityState {
        &self.capacity
    }

    /// Stable insertion index within the owning balancer; the final ordering
    /// tie-break.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Folds a measured call latency into the EWMA.
    pub fn sample(&self, latency: Duration) {
        let millis = latency.as_secs_f64() * 1_000.0;
        let mut current = self.latency_ewma.load(AtomicOrdering::Relaxed);
        loop {
            let prev = f64::from_bits(current);
            let next = if prev == 0.0 {
                millis
            } else {
                prev + LATENCY_EWMA_ALPHA * (millis - prev)
            };
            match self.latency_ewma.compare_exchange_weak(
                current,
                next.to_bits(),
                AtomicOrdering::Relaxed,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Smoothed latency in milliseconds; zero until the first sample.
    pub fn latency_ms(&self) -> f64 {
        f64::from_bits(self.latency_ewma.load(AtomicOrdering::Relaxed))
    }

    pub fn health(&self) -> f64 {
        self.capacity.health()
    }

    /// Marks the item unselectable for the given duration.
    pub fn skip_for(&self, duration: Duration) {
        let mut skip_until = self.lock_skip();
        *skip_until = Some(Instant::now() + duration);
    }

    /// Whether the item is currently unselectable: either explicitly skipped
    /// or below the configured health floor.
    pub fn is_skipped(&self) -> bool {
        self.is_skipped_at(Instant::now())
    }

    pub fn on_success(&self) {
        self.capacity.on_success();
    }

    /// Reports a failed call and returns the handler's verdict for the
    /// running per-item error count.
    pub fn on_error(&self, error_count: u32, class: ErrorClass) -> RetryAdvice {
        self.capacity.on_error(class);
        self.handler.advise(error_count, class)
    }

    fn is_skipped_at(&self, now: Instant) -> bool {
        if let Some(until) = *self.lock_skip() {
            if now < until {
                return true;
            }
        }
        self.health() < self.capacity.config().min_health_for_selection
    }

    fn lock_skip(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.skip_until.lock().expect("skip mutex poisoned")
    }
}

/// Sort key snapshot: skip status, health descending, latency ascending,
/// insertion index.
struct Rank {
    skipped: bool,
    health: f64,
    latency: f64,
    index: usize,
}

impl Rank {
    fn of<T>(item: &BalancedItem<T>, now: Instant) -> Self {
        Self {
            skipped: item.is_skipped_at(now),
            health: item.health(),
            latency: item.latency_ms(),
            index: item.index,
        }
    }

    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.skipped
            .cmp(&other.skipped)
            .then_with(|| other.health.total_cmp(&self.health))
            .then_with(|| self.latency.total_cmp(&other.latency))
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Ordered collection of balanced items.
///
/// The published order is only rewritten by [`sort`](Self::sort); readers
/// (`with_context`, `items`) see a stable head between sorts. [`peek`](Self::peek)
/// answers "who would be head after a re-sort" from fresh samples without
/// touching the published order.
#[derive(Debug)]
pub struct LoadBalancer<T> {
    items: Vec<Arc<BalancedItem<T>>>,
    sorted: RwLock<Vec<Arc<BalancedItem<T>>>>,
}

impl<T> LoadBalancer<T> {
    /// Creates a balancer over the given items, in insertion order, and
    /// publishes an initial sorted order.
    ///
    /// # Panics
    ///
    /// Panics if `items` is empty; a balancer always has at least one
    /// backend.
    pub fn new(items: Vec<BalancedItem<T>>) -> Self {
        assert!(!items.is_empty(), "LoadBalancer requires at least one item");
        let items: Vec<Arc<BalancedItem<T>>> = items
            .into_iter()
            .enumerate()
            .map(|(index, mut item)| {
                item.index = index;
                Arc::new(item)
            })
            .collect();
        let balancer = Self {
            sorted: RwLock::new(items.clone()),
            items,
        };
        balancer.sort();
        balancer
    }

    /// The current head of the published order.
    pub fn with_context(&self) -> Arc<BalancedItem<T>> {
        self.read_sorted()[0].clone()
    }

    /// The item that would be head after a re-sort with fresh samples. Does
    /// not mutate the published order.
    pub fn peek(&self) -> Arc<BalancedItem<T>> {
        let now = Instant::now();
        self.items
            .iter()
            .min_by(|a, b| Rank::of(a.as_ref(), now).cmp(&Rank::of(b.as_ref(), now)))
            .expect("balancer is never empty")
            .clone()
    }

    /// Re-materializes the published order from fresh samples.
    pub fn sort(&self) {
        let now = Instant::now();
        let mut keyed: Vec<(Rank, Arc<BalancedItem<T>>)> = self
            .items
            .iter()
            .map(|item| (Rank::of(item, now), item.clone()))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        let next: Vec<Arc<BalancedItem<T>>> = keyed.into_iter().map(|(_, item)| item).collect();
        *self.write_sorted() = next;
    }

    /// Snapshot of the published order.
    pub fn items(&self) -> Vec<Arc<BalancedItem<T>>> {
        self.read_sorted().clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn read_sorted(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<BalancedItem<T>>>> {
        self.sorted.read().expect("balancer order lock poisoned")
    }

    fn write_sorted(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<BalancedItem<T>>>> {
        self.sorted.write().expect("balancer order lock poisoned")
    }
}
