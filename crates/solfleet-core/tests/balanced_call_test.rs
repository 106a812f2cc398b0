//! End-to-end dispatcher scenarios against a mock backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solfleet_core::{
    BalancedItem, CallContext, CallError, CapacityConfig, ErrorHandler, LoadBalancer,
};

/// A scripted backend: fails the first `failures` invocations with the given
/// error factory, then succeeds with 42.
#[derive(Clone)]
struct MockBackend {
    name: &'static str,
    calls: Arc<AtomicU32>,
    failures_remaining: Arc<AtomicU32>,
    error: Arc<dyn Fn() -> CallError + Send + Sync>,
}

impl MockBackend {
    fn new(name: &'static str, failures: u32) -> Self {
        Self::with_error(name, failures, || {
            CallError::Transport("connection reset".to_string())
        })
    }

    fn with_error(
        name: &'static str,
        failures: u32,
        error: impl Fn() -> CallError + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            calls: Arc::new(AtomicU32::new(0)),
            failures_remaining: Arc::new(AtomicU32::new(failures)),
            error: Arc::new(error),
        }
    }

    fn always_failing(name: &'static str) -> Self {
        Self::new(name, u32::MAX)
    }

    async fn invoke(&self) -> Result<u32, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err((self.error)())
        } else {
            Ok(42)
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn balancer_of(
    backends: &[MockBackend],
    capacity: CapacityConfig,
    handler: ErrorHandler,
) -> LoadBalancer<MockBackend> {
    LoadBalancer::new(
        backends
            .iter()
            .map(|b| BalancedItem::new(b.clone(), capacity.clone(), handler.clone()))
            .collect(),
    )
}

fn no_refill(max_tokens: u32) -> CapacityConfig {
    CapacityConfig::new(max_tokens, 0.0)
}

// S1: single item, courteous happy path. One invocation, one claim of
// weight 1, one success sample.
#[tokio::test]
async fn courteous_happy_path_claims_once() {
    let backend = MockBackend::new("a", 0);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        no_refill(10),
        ErrorHandler::default(),
    );
    let ctx = CallContext::default();

    let result = lb
        .call(&ctx, "happy path", |b| async move { b.invoke().await })
        .await
        .unwrap();

    assert_eq!(result, Some(42));
    assert_eq!(backend.calls(), 1);
    let item = &lb.items()[0];
    assert_eq!(item.capacity().tokens(), 9.0);
    assert_eq!(item.health(), 1.0);
}

// S2: single item, 3 transient failures then success under exponential
// backoff base 10ms. Total sleep stays within [10+20+40, that + jitter cap].
#[tokio::test(start_paused = true)]
async fn exponential_backoff_sleeps_between_retries() {
    let backend = MockBackend::new("a", 3);
    let handler = ErrorHandler::exponential(Duration::from_millis(10), Duration::from_secs(1));
    let lb = balancer_of(std::slice::from_ref(&backend), no_refill(100), handler);
    let ctx = CallContext {
        max_retries: 5,
        ..CallContext::default()
    };

    let started = tokio::time::Instant::now();
    let result = lb
        .call(&ctx, "backoff", |b| async move { b.invoke().await })
        .await
        .unwrap();
    let slept = started.elapsed();

    assert_eq!(result, Some(42));
    assert_eq!(backend.calls(), 4);
    assert!(slept >= Duration::from_millis(70), "slept {slept:?}");
    // 10% jitter cap on each of the three delays
    assert!(slept <= Duration::from_millis(77), "slept {slept:?}");
}

// S3: three items, the head fails once, the dispatcher rotates without
// sleeping and the second item succeeds.
#[tokio::test(start_paused = true)]
async fn failover_rotates_without_sleeping() {
    let a = MockBackend::always_failing("a");
    let b = MockBackend::new("b", 0);
    let c = MockBackend::new("c", 0);
    let lb = balancer_of(
        &[a.clone(), b.clone(), c.clone()],
        no_refill(100),
        ErrorHandler::default(),
    );
    let ctx = CallContext::default();

    let started = tokio::time::Instant::now();
    let result = lb
        .call(&ctx, "failover", |b| async move { b.invoke().await })
        .await
        .unwrap();

    assert_eq!(result, Some(42));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
    // only the failed item's health dropped
    let items = lb.items();
    let failed = items.iter().find(|i| i.item().name == "a").unwrap();
    let healthy = items.iter().find(|i| i.item().name == "b").unwrap();
    assert_eq!(failed.health(), 0.0);
    assert_eq!(healthy.health(), 1.0);
}

// S4: courteous without force_call and no capacity anywhere: the selector
// sleeps max_try_claim times, then reports no capacity without invoking.
#[tokio::test(start_paused = true)]
async fn courteous_without_capacity_returns_none() {
    let a = MockBackend::new("a", 0);
    let b = MockBackend::new("b", 0);
    let lb = balancer_of(
        &[a.clone(), b.clone()],
        CapacityConfig::new(0, 1.0),
        ErrorHandler::default(),
    );
    let ctx = CallContext {
        max_try_claim: 2,
        ..CallContext::default()
    };

    let started = tokio::time::Instant::now();
    let result = lb
        .call(&ctx, "no capacity", |b| async move { b.invoke().await })
        .await
        .unwrap();

    assert_eq!(result, None);
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 0);
    // one ~1s capacity sleep per claim attempt (wall-clock refill shaves a
    // little off each estimate)
    let slept = started.elapsed();
    assert!(slept > Duration::from_millis(1_800), "slept {slept:?}");
    assert!(slept <= Duration::from_secs(2), "slept {slept:?}");
}

#[tokio::test(start_paused = true)]
async fn force_call_overdrafts_after_exhausting_claims() {
    let backend = MockBackend::new("a", 0);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        CapacityConfig::new(0, 1.0),
        ErrorHandler::default(),
    );
    let ctx = CallContext {
        max_try_claim: 2,
        force_call: true,
        ..CallContext::default()
    };

    let result = lb
        .call(&ctx, "forced", |b| async move { b.invoke().await })
        .await
        .unwrap();

    assert_eq!(result, Some(42));
    assert_eq!(backend.calls(), 1);
    assert!(lb.items()[0].capacity().tokens() < 0.0);
}

// A drained backend that never refills reports an unbounded wait: the
// courteous selector must resolve instead of sleeping on it.
#[tokio::test(start_paused = true)]
async fn courteous_never_refilling_backend_resolves_without_sleeping() {
    let backend = MockBackend::new("a", 0);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        no_refill(0),
        ErrorHandler::default(),
    );

    let started = tokio::time::Instant::now();
    let result = lb
        .call(
            &CallContext::default(),
            "unbounded wait",
            |b| async move { b.invoke().await },
        )
        .await
        .unwrap();
    assert_eq!(result, None);
    assert_eq!(backend.calls(), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);

    let forced = CallContext {
        force_call: true,
        ..CallContext::default()
    };
    let result = lb
        .call(&forced, "unbounded wait forced", |b| async move {
            b.invoke().await
        })
        .await
        .unwrap();
    assert_eq!(result, Some(42));
    assert_eq!(backend.calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn greedy_mode_overdrafts_immediately() {
    let backend = MockBackend::new("a", 0);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        no_refill(0),
        ErrorHandler::default(),
    );
    let ctx = CallContext::greedy();

    let result = lb
        .call(&ctx, "greedy", |b| async move { b.invoke().await })
        .await
        .unwrap();

    assert_eq!(result, Some(42));
    assert_eq!(lb.items()[0].capacity().tokens(), -1.0);
}

#[tokio::test]
async fn unchecked_mode_does_no_accounting() {
    let backend = MockBackend::new("a", 0);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        no_refill(5),
        ErrorHandler::default(),
    );
    let ctx = CallContext::unchecked();

    let result = lb
        .call(&ctx, "unchecked", |b| async move { b.invoke().await })
        .await
        .unwrap();

    assert_eq!(result, Some(42));
    assert_eq!(lb.items()[0].capacity().tokens(), 5.0);
}

// Invariant 1: at most num_items + max_retries invocations per call.
#[tokio::test(start_paused = true)]
async fn retry_cap_bounds_total_invocations() {
    let backends = [
        MockBackend::always_failing("a"),
        MockBackend::always_failing("b"),
        MockBackend::always_failing("c"),
    ];
    let lb = balancer_of(&backends, no_refill(1000), ErrorHandler::default());
    let ctx = CallContext {
        max_retries: 2,
        ..CallContext::default()
    };

    let result = lb
        .call(&ctx, "retry cap", |b| async move { b.invoke().await })
        .await;

    assert!(result.is_err());
    let total: u32 = backends.iter().map(|b| b.calls()).sum();
    assert!(total <= 3 + 2, "invoked {total} times");
    assert!(total > 2, "failover never happened");
}

#[tokio::test]
async fn fatal_error_propagates_without_failover() {
    let a = MockBackend::with_error("a", u32::MAX, || CallError::Remote {
        status: 404,
        message: "not found".to_string(),
    });
    let b = MockBackend::new("b", 0);
    let lb = balancer_of(&[a.clone(), b.clone()], no_refill(100), ErrorHandler::default());

    let result = lb
        .call(
            &CallContext::default(),
            "fatal",
            |b| async move { b.invoke().await },
        )
        .await;

    assert!(matches!(
        result,
        Err(CallError::Remote { status: 404, .. })
    ));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn cancellation_is_fatal() {
    let backend = MockBackend::with_error("a", u32::MAX, || CallError::Cancelled);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        no_refill(100),
        ErrorHandler::default(),
    );

    let result = lb
        .call(
            &CallContext::default(),
            "cancelled",
            |b| async move { b.invoke().await },
        )
        .await;

    assert!(matches!(result, Err(CallError::Cancelled)));
    assert_eq!(backend.calls(), 1);
}

// Invariant 2: under courteous mode every invocation is paid for exactly
// once, including across retries.
#[tokio::test(start_paused = true)]
async fn courteous_accounting_matches_invocations() {
    let backend = MockBackend::new("a", 2);
    let handler = ErrorHandler::linear(Duration::from_millis(1), Duration::from_millis(10));
    let lb = balancer_of(std::slice::from_ref(&backend), no_refill(50), handler);

    let result = lb
        .call(
            &CallContext::default(),
            "accounting",
            |b| async move { b.invoke().await },
        )
        .await
        .unwrap();

    assert_eq!(result, Some(42));
    assert_eq!(backend.calls(), 3);
    // no refill configured: 50 - 3 claims of weight 1
    assert_eq!(lb.items()[0].capacity().tokens(), 47.0);
}

#[tokio::test]
async fn measured_calls_feed_the_latency_ewma() {
    let backend = MockBackend::new("a", 0);
    let lb = balancer_of(
        std::slice::from_ref(&backend),
        no_refill(10),
        ErrorHandler::default(),
    );
    let ctx = CallContext {
        measure_call_time: true,
        ..CallContext::default()
    };

    lb.call(&ctx, "measured", |b| async move { b.invoke().await })
        .await
        .unwrap();

    // the sample landed, whatever the wall duration was
    assert!(lb.items()[0].latency_ms() >= 0.0);
    let unmeasured = CallContext::default();
    lb.call(&unmeasured, "unmeasured", |b| async move { b.invoke().await })
        .await
        .unwrap();
}
