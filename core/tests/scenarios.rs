//! End-to-end breaker behaviour through `execute`, on paused Tokio time.

use outcall_breaker::{
    BreakerState, CircuitBreaker, CircuitBuilder, CircuitError, CircuitErrorKind, MemoryStorage,
    StorageBackend,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
enum ApiError {
    Network(String),
    Remote(u16),
    Validation(String),
    Unavailable,
    Breaker(CircuitErrorKind),
}

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail,
    Invalid,
    Slow(Duration),
    Hold(Arc<Semaphore>),
}

type Breaker = CircuitBreaker<Behavior, u32, ApiError>;
type Builder = CircuitBuilder<Behavior, u32, ApiError>;

struct Harness {
    breaker: Breaker,
    calls: Arc<AtomicUsize>,
    storage: Arc<MemoryStorage>,
}

impl Harness {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn window_failures(&self) -> usize {
        self.storage.failure_count(self.breaker.name(), WINDOW)
    }

    fn window_attempts(&self) -> usize {
        self.window_failures() + self.storage.success_count(self.breaker.name(), WINDOW)
    }

    async fn run(&self, behavior: Behavior) -> Result<u32, ApiError> {
        self.breaker.execute(behavior).await
    }
}

/// The configuration every breaker in the payments service uses
fn service_defaults(name: &str) -> Builder {
    CircuitBuilder::new(name)
        .error_threshold(20)
        .timeout_ms(20_000)
        .health_requests(5)
        .sleep_time_ms(100)
        .max_requests(0)
}

fn harness(builder: Builder) -> Harness {
    let calls = Arc::new(AtomicUsize::new(0));
    let storage = Arc::new(MemoryStorage::new());

    let counter = Arc::clone(&calls);
    let breaker = builder
        .storage(storage.clone())
        .request(move |behavior: Behavior| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                match behavior {
                    Behavior::Succeed => Ok(1),
                    Behavior::Fail => Err(ApiError::Remote(502)),
                    Behavior::Invalid => Err(ApiError::Validation("bad card".to_string())),
                    Behavior::Slow(delay) => {
                        tokio::time::sleep(delay).await;
                        Ok(2)
                    }
                    Behavior::Hold(gate) => {
                        let _permit = gate
                            .acquire()
                            .await
                            .map_err(|_| ApiError::Network("gate closed".to_string()))?;
                        Ok(3)
                    }
                }
            }
        })
        .fallback(|err, _behavior| {
            Err(match err {
                CircuitError::Execution(e) => e,
                other => ApiError::Breaker(other.kind()),
            })
        })
        .build()
        .expect("valid breaker");

    Harness {
        breaker,
        calls,
        storage,
    }
}

async fn trip(h: &Harness) {
    for _ in 0..10 {
        let _ = h.run(Behavior::Fail).await;
    }
    assert_eq!(h.breaker.state(), BreakerState::Open);
}

async fn wait_for_in_flight(breaker: &Breaker, expected: usize) {
    while breaker.in_flight() < expected {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_thirty_percent_failures_open_the_circuit_then_probe() {
    let h = harness(service_defaults("stripePaymentIntentsCreate"));

    for i in 0..10 {
        let behavior = if i < 3 { Behavior::Fail } else { Behavior::Succeed };
        let _ = h.run(behavior).await;
    }
    assert_eq!(h.breaker.state(), BreakerState::Open);
    assert_eq!(h.calls(), 10);
    assert_eq!(h.window_attempts(), 0, "window reset on trip");

    let rejected = h.run(Behavior::Succeed).await;
    assert_eq!(rejected, Err(ApiError::Breaker(CircuitErrorKind::Open)));
    assert_eq!(h.calls(), 10, "request not invoked while open");

    tokio::time::advance(Duration::from_millis(100)).await;
    let probe = h.run(Behavior::Succeed).await;
    assert_eq!(probe, Ok(1));
    assert_eq!(h.calls(), 11);
    assert_eq!(h.breaker.state(), BreakerState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_failure_rate_below_threshold_keeps_circuit_closed() {
    let h = harness(service_defaults("stripeCustomersUpdate"));

    // 1 in 10 = 10% < 20%
    for i in 0..30 {
        let behavior = if i % 10 == 0 { Behavior::Fail } else { Behavior::Succeed };
        let _ = h.run(behavior).await;
    }

    assert!(h.breaker.is_closed());
    assert_eq!(h.window_failures(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_for_the_whole_sleep_window() {
    let h = harness(service_defaults("stripeSubscriptionsCreate").sleep_time_ms(500));
    trip(&h).await;

    for _ in 0..4 {
        tokio::time::advance(Duration::from_millis(100)).await;
        let result = h.run(Behavior::Succeed).await;
        assert_eq!(result, Err(ApiError::Breaker(CircuitErrorKind::Open)));
    }
    assert_eq!(h.calls(), 10);

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
    assert!(h.breaker.is_half_open());
}

#[tokio::test(start_paused = true)]
async fn test_full_probe_budget_of_successes_closes_the_circuit() {
    let h = harness(service_defaults("stripePaymentMethodsAttach"));
    trip(&h).await;
    tokio::time::advance(Duration::from_millis(100)).await;

    for probe in 1..=5 {
        assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
        let expected = if probe < 5 {
            BreakerState::HalfOpen
        } else {
            BreakerState::Closed
        };
        assert_eq!(h.breaker.state(), expected, "after probe {}", probe);
    }

    assert_eq!(h.window_attempts(), 0, "counters reset on close");
    assert_eq!(h.breaker.status().opened_at, None);
}

#[tokio::test(start_paused = true)]
async fn test_last_probe_failing_reopens_instead_of_closing() {
    let h = harness(service_defaults("stripeSubscriptionsDel"));
    trip(&h).await;
    tokio::time::advance(Duration::from_millis(100)).await;

    for _ in 0..4 {
        assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
    }
    assert_eq!(h.run(Behavior::Fail).await, Err(ApiError::Remote(502)));

    assert_eq!(h.breaker.state(), BreakerState::Open);

    // Fresh open timer
    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(
        h.run(Behavior::Succeed).await,
        Err(ApiError::Breaker(CircuitErrorKind::Open))
    );
    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_at_most_the_probe_budget_concurrently() {
    let h = harness(service_defaults("usersGetCustomer").health_requests(3));
    trip(&h).await;
    tokio::time::advance(Duration::from_millis(100)).await;

    let gate = Arc::new(Semaphore::new(0));
    let mut probes = Vec::new();
    for _ in 0..3 {
        let breaker = h.breaker.clone();
        let gate = Arc::clone(&gate);
        probes.push(tokio::spawn(
            async move { breaker.execute(Behavior::Hold(gate)).await },
        ));
    }
    wait_for_in_flight(&h.breaker, 3).await;

    for _ in 0..5 {
        assert_eq!(
            h.run(Behavior::Succeed).await,
            Err(ApiError::Breaker(CircuitErrorKind::HalfOpenLimitReached))
        );
    }
    assert_eq!(h.calls(), 13);

    gate.add_permits(3);
    for probe in probes {
        assert_eq!(probe.await.expect("probe task"), Ok(3));
    }
    assert!(h.breaker.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_saturated_breaker_rejects_without_touching_the_window() {
    let h = harness(service_defaults("deliveriesCreate").max_requests(10));
    let gate = Arc::new(Semaphore::new(0));

    let mut held = Vec::new();
    for _ in 0..10 {
        let breaker = h.breaker.clone();
        let gate = Arc::clone(&gate);
        held.push(tokio::spawn(
            async move { breaker.execute(Behavior::Hold(gate)).await },
        ));
    }
    wait_for_in_flight(&h.breaker, 10).await;

    let rejected = h.run(Behavior::Succeed).await;
    assert_eq!(rejected, Err(ApiError::Breaker(CircuitErrorKind::Saturated)));
    assert_eq!(h.calls(), 10);
    assert_eq!(h.window_attempts(), 0);

    gate.add_permits(10);
    for call in held {
        assert_eq!(call.await.expect("held task"), Ok(3));
    }
    assert_eq!(h.breaker.in_flight(), 0);
    assert_eq!(h.window_attempts(), 10);
    assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure_and_bounds_latency() {
    let h = harness(service_defaults("productsRetrieveProducts").timeout_ms(20));

    let started = tokio::time::Instant::now();
    let result = h.run(Behavior::Slow(Duration::from_secs(5))).await;

    assert_eq!(result, Err(ApiError::Breaker(CircuitErrorKind::Timeout)));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(20) && waited < Duration::from_secs(1));
    assert_eq!(h.window_failures(), 1);
    assert_eq!(h.breaker.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_completion_after_timeout_is_discarded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let storage = Arc::new(MemoryStorage::new());
    let counter = Arc::clone(&calls);

    // The underlying work keeps running on its own task after the deadline
    let breaker = CircuitBuilder::new("stripeWebhooksConstructEvent")
        .timeout_ms(20)
        .minimum_requests(1)
        .storage(storage.clone())
        .request(move |delay: Duration| {
            let counter = Arc::clone(&counter);
            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(7u32);
            });
            async move { rx.await.map_err(|_| "worker dropped".to_string()) }
        })
        .fallback(|err: CircuitError<String>, _| Err(err.to_string()))
        .build()
        .expect("valid breaker");

    let result = breaker.execute(Duration::from_millis(200)).await;
    assert!(result.is_err());
    assert!(breaker.is_open());

    tokio::time::advance(Duration::from_millis(300)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "underlying work did finish");
    assert!(breaker.is_open(), "late result had no effect");
    assert_eq!(storage.success_count("stripeWebhooksConstructEvent", WINDOW), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_errors_never_count_but_reach_the_fallback() {
    let h = harness(
        service_defaults("stripePaymentIntentsCreate")
            .error_handler(|err: &ApiError| matches!(err, ApiError::Validation(_))),
    );

    for _ in 0..25 {
        assert_eq!(
            h.run(Behavior::Invalid).await,
            Err(ApiError::Validation("bad card".to_string()))
        );
    }
    assert!(h.breaker.is_closed());
    assert_eq!(h.window_attempts(), 0);

    trip(&h).await;
    tokio::time::advance(Duration::from_millis(100)).await;

    // Ignored probe errors hand their slot back and do not reopen
    for _ in 0..10 {
        let _ = h.run(Behavior::Invalid).await;
    }
    assert!(h.breaker.is_half_open());

    for _ in 0..5 {
        assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
    }
    assert!(h.breaker.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_releases_its_slot() {
    let h = harness(service_defaults("usersGetCustomer").health_requests(1));
    trip(&h).await;
    tokio::time::advance(Duration::from_millis(100)).await;

    let gate = Arc::new(Semaphore::new(0));
    let breaker = h.breaker.clone();
    let held_gate = Arc::clone(&gate);
    let probe = tokio::spawn(async move { breaker.execute(Behavior::Hold(held_gate)).await });
    wait_for_in_flight(&h.breaker, 1).await;

    assert_eq!(
        h.run(Behavior::Succeed).await,
        Err(ApiError::Breaker(CircuitErrorKind::HalfOpenLimitReached))
    );

    probe.abort();
    let _ = probe.await;
    assert_eq!(h.breaker.in_flight(), 0);

    assert_eq!(h.run(Behavior::Succeed).await, Ok(1));
    assert!(h.breaker.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_can_supply_a_recovery_value() {
    let breaker = CircuitBuilder::new("productsRetrieveProducts")
        .minimum_requests(1)
        .request(|_ids: Vec<u32>| async { Err::<Vec<u32>, _>(ApiError::Remote(500)) })
        .fallback(|_err, ids| Ok(ids))
        .build()
        .expect("valid breaker");

    assert_eq!(breaker.execute(vec![1, 2]).await, Ok(vec![1, 2]));
    assert!(breaker.is_open());
    assert_eq!(breaker.execute(vec![3]).await, Ok(vec![3]));
}

#[tokio::test(start_paused = true)]
async fn test_service_fallback_separates_network_errors_from_unavailability() {
    // Network errors pass through untouched; everything else becomes a 503
    let breaker = CircuitBuilder::<&'static str, u32, ApiError>::new("usersGetCustomer")
        .minimum_requests(1)
        .request(|customer| async move {
            match customer {
                "offline" => Err(ApiError::Network("connection refused".to_string())),
                _ => Err(ApiError::Remote(500)),
            }
        })
        .fallback(|err, _customer| match err {
            CircuitError::Execution(ApiError::Network(reason)) => Err(ApiError::Network(reason)),
            _ => Err(ApiError::Unavailable),
        })
        .build()
        .expect("valid breaker");

    assert_eq!(
        breaker.execute("offline").await,
        Err(ApiError::Network("connection refused".to_string()))
    );
    assert!(breaker.is_open());
    assert_eq!(breaker.execute("cus_1").await, Err(ApiError::Unavailable));
}

#[tokio::test(start_paused = true)]
async fn test_hundreds_of_concurrent_callers_keep_accounting_exact() {
    let h = harness(service_defaults("stripePaymentIntentsCreate"));

    let mut tasks = Vec::new();
    for i in 0..300u64 {
        let breaker = h.breaker.clone();
        tasks.push(tokio::spawn(async move {
            breaker
                .execute(Behavior::Slow(Duration::from_millis(i % 7)))
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("task"), Ok(2));
    }

    assert!(h.breaker.is_closed());
    assert_eq!(h.breaker.in_flight(), 0);
    assert_eq!(h.window_attempts(), 300);
}
