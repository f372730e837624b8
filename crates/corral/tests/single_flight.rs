//! End-to-end coordination scenarios over the in-memory backends.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use corral::AdapterError;
use corral::AdapterSpec;
use corral::BoxedError;
use corral::Cache;
use corral::CallOptions;
use corral::CancellationToken;
use corral::Clock;
use corral::FallbackContext;
use corral::FetchContext;
use corral::FlightHooks;
use corral::FollowerWaitContext;
use corral::HitContext;
use corral::LeaderContext;
use corral::Leases;
use corral::MemoryCache;
use corral::MemoryLeases;
use corral::Options;
use corral::Outcome;
use corral::SimulatedClock;
use corral::SingleFlight;
use corral::SystemClock;

struct Fixture {
    clock: Arc<SimulatedClock>,
    cache: Arc<MemoryCache>,
    leases: Arc<MemoryLeases>,
    flights: SingleFlight,
}

/// Backends plus facade on a simulated clock.
fn simulated_fixture() -> Fixture {
    let clock = Arc::new(SimulatedClock::new(1_000_000));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let cache = MemoryCache::new(dyn_clock.clone());
    let leases = MemoryLeases::new(dyn_clock.clone());
    let mut options = Options::new(AdapterSpec::instances(cache.clone(), leases.clone()));
    options.clock = Some(dyn_clock);
    Fixture {
        clock,
        cache: cache.clone(),
        leases: leases.clone(),
        flights: SingleFlight::new(options).expect("fixture options are valid"),
    }
}

/// Backends plus facade on the real clock, for concurrency scenarios.
fn real_time_fixture() -> (Arc<MemoryCache>, Arc<MemoryLeases>, Arc<SingleFlight>) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = MemoryCache::new(clock.clone());
    let leases = MemoryLeases::new(clock.clone());
    let mut options = Options::new(AdapterSpec::instances(cache.clone(), leases.clone()));
    options.clock = Some(clock);
    (cache.clone(), leases.clone(), Arc::new(SingleFlight::new(options).expect("fixture options are valid")))
}

fn fetcher_returning(
    fetches: &Arc<AtomicU32>,
    value: &'static [u8],
    delay: Duration,
) -> impl FnOnce(FetchContext) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, BoxedError>> + Send>> {
    let fetches = fetches.clone();
    move |_ctx| {
        Box::pin(async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(value.to_vec())
        })
    }
}

// ============================================================================
// Leader and hit paths
// ============================================================================

#[tokio::test]
async fn single_caller_becomes_leader_and_releases() {
    let fx = simulated_fixture();
    let fetches = Arc::new(AtomicU32::new(0));

    let call = CallOptions {
        lease_ttl_ms: Some(1_000),
        cache_ttl_ms: Some(5_000),
        ..CallOptions::default()
    };
    let result = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::ZERO), call)
        .await
        .unwrap();

    assert_eq!(result.meta.outcome, Outcome::MissLeader);
    assert_eq!(result.value, b"v");
    assert_eq!(result.meta.waited_ms, Some(0));
    assert!(result.meta.lease_until_ms.is_some());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // The value landed in the cache and the lease was released.
    assert_eq!(fx.cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    assert!(fx.leases.record("k").await.is_none());

    // A fresh acquire wins immediately.
    let acquired = fx.leases.acquire("k", "probe-owner", 1_000).await.unwrap();
    assert!(acquired.is_leader());
}

#[tokio::test]
async fn cached_value_short_circuits_without_touching_leases() {
    let fx = simulated_fixture();
    fx.cache.insert_raw("k", b"v".to_vec(), None).await;
    let fetches = Arc::new(AtomicU32::new(0));

    let result = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"X", Duration::ZERO), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(result.meta.outcome, Outcome::Hit);
    assert_eq!(result.value, b"v");
    assert_eq!(result.meta.lease_until_ms, None);
    assert_eq!(result.meta.waited_ms, None);
    assert_eq!(fetches.load(Ordering::SeqCst), 0, "a hit never invokes the fetcher");
    assert_eq!(fx.leases.acquire_count(), 0, "a hit never touches the lease store");
}

#[tokio::test]
async fn back_to_back_calls_hit_after_leader_caches() {
    let fx = simulated_fixture();
    let fetches = Arc::new(AtomicU32::new(0));

    let call = CallOptions {
        cache_ttl_ms: Some(60_000),
        ..CallOptions::default()
    };
    let first = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::ZERO), call)
        .await
        .unwrap();
    assert_eq!(first.meta.outcome, Outcome::MissLeader);
    assert_eq!(fx.leases.acquire_count(), 1);

    let second = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::ZERO), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(second.meta.outcome, Outcome::Hit);
    assert_eq!(fx.leases.acquire_count(), 1, "the second call must not touch the lease store");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn leader_respects_should_cache_predicate() {
    let fx = simulated_fixture();
    let fetches = Arc::new(AtomicU32::new(0));
    let predicate_calls = Arc::new(AtomicU32::new(0));

    let call = CallOptions {
        should_cache: Some({
            let predicate_calls = predicate_calls.clone();
            Arc::new(move |_value: &[u8]| {
                predicate_calls.fetch_add(1, Ordering::SeqCst);
                false
            })
        }),
        ..CallOptions::default()
    };
    let result = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::ZERO), call)
        .await
        .unwrap();

    assert_eq!(result.meta.outcome, Outcome::MissLeaderNocache);
    assert_eq!(predicate_calls.load(Ordering::SeqCst), 1, "the predicate is consulted exactly once");
    assert_eq!(fx.cache.set_count(), 0, "a declined value is never written");
    assert!(fx.leases.record("k").await.is_none(), "the lease is still released");
}

#[tokio::test]
async fn leader_releases_lease_when_fetcher_fails() {
    let fx = simulated_fixture();

    let err = fx
        .flights
        .get_or_set(
            "k",
            |_ctx| async { Err::<Vec<u8>, BoxedError>("upstream 503".to_string().into()) },
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "FETCHER_FAILED");
    assert!(fx.leases.record("k").await.is_none(), "release must run on the error path");
    assert_eq!(fx.leases.release_count(), 1);
}

// ============================================================================
// Follower paths
// ============================================================================

/// Cache wrapper that reports misses for the first N reads, regardless of
/// contents. Makes the follower poll loop deterministic.
struct DelayedVisibility {
    inner: Arc<MemoryCache>,
    misses_remaining: AtomicU32,
}

#[async_trait]
impl Cache for DelayedVisibility {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        let gate = self.misses_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if gate.is_ok() {
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_ms: Option<u64>) -> Result<(), AdapterError> {
        self.inner.set(key, value, ttl_ms).await
    }
}

#[tokio::test]
async fn follower_observes_cached_value_while_polling() {
    let clock = Arc::new(SimulatedClock::new(1_000_000));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let inner = MemoryCache::new(dyn_clock.clone());
    inner.insert_raw("k", b"v".to_vec(), None).await;
    let cache: Arc<dyn Cache> = Arc::new(DelayedVisibility {
        inner,
        misses_remaining: AtomicU32::new(2),
    });
    let leases = MemoryLeases::new(dyn_clock.clone());

    // Someone else holds the lease and never marks it ready.
    leases.acquire("k", "other-owner", 60_000).await.unwrap();

    let mut options = Options::new(AdapterSpec::Instances {
        cache,
        leases: Some(leases.clone()),
    });
    options.clock = Some(dyn_clock);
    let flights = SingleFlight::new(options).unwrap();

    let fetches = Arc::new(AtomicU32::new(0));
    let call = CallOptions {
        wait_max_ms: Some(100),
        wait_step_ms: Some(10),
        ..CallOptions::default()
    };
    let result = flights
        .get_or_set("k", fetcher_returning(&fetches, b"X", Duration::ZERO), call)
        .await
        .unwrap();

    // Probe missed, first loop read missed, one 10ms sleep, second loop
    // read saw the value.
    assert_eq!(result.meta.outcome, Outcome::MissFollowerHit);
    assert_eq!(result.value, b"v");
    assert_eq!(result.meta.waited_ms, Some(10));
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert!(leases.record("k").await.is_some(), "a follower never releases the lease");
}

#[tokio::test]
async fn follower_falls_back_when_budget_is_exhausted() {
    let fx = simulated_fixture();

    // A foreign holder keeps the lease for far longer than the budget.
    fx.leases.acquire("k", "other-owner", 600_000).await.unwrap();

    let fetches = Arc::new(AtomicU32::new(0));
    let call = CallOptions {
        wait_max_ms: Some(100),
        wait_step_ms: Some(10),
        ..CallOptions::default()
    };
    let result = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"mine", Duration::ZERO), call)
        .await
        .unwrap();

    assert_eq!(result.meta.outcome, Outcome::MissFollowerFallback);
    assert_eq!(result.value, b"mine");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let waited = result.meta.waited_ms.expect("followers report wait time");
    assert!(waited >= 100, "the budget must be spent before falling back, waited {waited}ms");
    assert!(waited <= 150, "waited {waited}ms overshoots the budget");
    assert_eq!(fx.cache.set_count(), 0, "a fallback fetch never writes the cache");
    assert_eq!(fx.leases.record("k").await.unwrap().owner, "other-owner");
}

#[tokio::test]
async fn zero_wait_budget_goes_straight_to_fallback() {
    let fx = simulated_fixture();
    fx.leases.acquire("k", "other-owner", 600_000).await.unwrap();

    let fetches = Arc::new(AtomicU32::new(0));
    let call = CallOptions {
        wait_max_ms: Some(0),
        ..CallOptions::default()
    };
    let result = fx
        .flights
        .get_or_set("k", fetcher_returning(&fetches, b"mine", Duration::ZERO), call)
        .await
        .unwrap();

    assert_eq!(result.meta.outcome, Outcome::MissFollowerFallback);
    assert_eq!(result.meta.waited_ms, Some(0));
    // Initial probe plus the single final check; no poll iterations.
    assert_eq!(fx.cache.get_count(), 2);
}

#[tokio::test]
async fn follower_stops_waiting_once_leader_marks_ready_without_caching() {
    let (cache, leases, flights) = real_time_fixture();
    let fetches = Arc::new(AtomicU32::new(0));

    let leader = {
        let flights = flights.clone();
        let fetches = fetches.clone();
        tokio::spawn(async move {
            let call = CallOptions {
                lease_ttl_ms: Some(10_000),
                should_cache: Some(Arc::new(|_value: &[u8]| false)),
                ..CallOptions::default()
            };
            flights
                .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::from_millis(40)), call)
                .await
        })
    };

    // Give the leader time to acquire before the follower starts.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let follower = {
        let flights = flights.clone();
        let fetches = fetches.clone();
        tokio::spawn(async move {
            let call = CallOptions {
                wait_max_ms: Some(2_000),
                wait_step_ms: Some(5),
                ..CallOptions::default()
            };
            flights
                .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::ZERO), call)
                .await
        })
    };

    let leader_result = leader.await.unwrap().unwrap();
    let follower_result = follower.await.unwrap().unwrap();

    assert_eq!(leader_result.meta.outcome, Outcome::MissLeaderNocache);
    assert_eq!(follower_result.meta.outcome, Outcome::MissFollowerFallback);
    assert_eq!(fetches.load(Ordering::SeqCst), 2, "leader fetch plus follower fallback fetch");
    let waited = follower_result.meta.waited_ms.unwrap();
    assert!(waited < 2_000, "readiness must end the wait before the budget, waited {waited}ms");
    assert_eq!(cache.set_count(), 0);
    assert!(leases.record("k").await.is_none());
}

// ============================================================================
// Concurrent single-flight
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_concurrent_callers_fetch_once() {
    let (_cache, _leases, flights) = real_time_fixture();
    let fetches = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let flights = flights.clone();
        let fetches = fetches.clone();
        handles.push(tokio::spawn(async move {
            let call = CallOptions {
                lease_ttl_ms: Some(1_000),
                wait_max_ms: Some(500),
                wait_step_ms: Some(10),
                cache_ttl_ms: Some(1_000),
                ..CallOptions::default()
            };
            flights
                .get_or_set("k", fetcher_returning(&fetches, b"v", Duration::from_millis(50)), call)
                .await
                .unwrap()
        }));
    }

    let mut outcomes: Vec<Outcome> = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.value, b"v");
        outcomes.push(result.meta.outcome);
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1, "exactly one fetch across all callers");
    let leaders = outcomes.iter().filter(|o| **o == Outcome::MissLeader).count();
    let follower_hits = outcomes.iter().filter(|o| **o == Outcome::MissFollowerHit).count();
    assert_eq!(leaders, 1, "outcomes: {outcomes:?}");
    assert_eq!(follower_hits, 9, "outcomes: {outcomes:?}");
}

// ============================================================================
// Lease expiry
// ============================================================================

#[tokio::test]
async fn expired_lease_yields_a_new_leader() {
    let fx = simulated_fixture();

    fx.leases.acquire("k", "owner-1", 10).await.unwrap();
    fx.clock.advance_ms(20);

    let observed_owner = Arc::new(Mutex::new(None::<String>));
    let leases = fx.leases.clone();
    let observed = observed_owner.clone();
    let call = CallOptions {
        owner_id: Some("owner-2".to_string()),
        ..CallOptions::default()
    };
    let result = fx
        .flights
        .get_or_set(
            "k",
            move |_ctx| async move {
                let owner = leases.record("k").await.map(|r| r.owner);
                *observed.lock().unwrap() = owner;
                Ok(b"v".to_vec())
            },
            call,
        )
        .await
        .unwrap();

    assert_eq!(result.meta.outcome, Outcome::MissLeader);
    assert_eq!(
        observed_owner.lock().unwrap().as_deref(),
        Some("owner-2"),
        "the expired record must be overwritten by the new leader"
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn pre_cancelled_call_aborts_before_any_backend_io() {
    let fx = simulated_fixture();
    let token = CancellationToken::new();
    token.cancel();

    let call = CallOptions {
        cancel: Some(token),
        ..CallOptions::default()
    };
    let err = fx
        .flights
        .get_or_set("k", |_ctx| async { Ok(b"v".to_vec()) }, call)
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "ABORTED");
    assert_eq!(fx.cache.get_count(), 0);
    assert_eq!(fx.leases.acquire_count(), 0);
}

#[tokio::test]
async fn cancellation_mid_fetch_aborts_and_still_releases_the_lease() {
    let (_cache, leases, flights) = real_time_fixture();
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let call = CallOptions {
        cancel: Some(token),
        ..CallOptions::default()
    };
    let err = flights
        .get_or_set(
            "k",
            |ctx: FetchContext| async move {
                // Cooperate with cancellation like a well-behaved client.
                ctx.cancel.cancelled().await;
                Err::<Vec<u8>, BoxedError>("cancelled".to_string().into())
            },
            call,
        )
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "ABORTED");

    // The drop-path release is fire-and-forget; give it a moment.
    for _ in 0..50 {
        if leases.record("k").await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(leases.record("k").await.is_none(), "cancellation must not leak the lease");
}

// ============================================================================
// Hooks
// ============================================================================

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    fail_on_leader: bool,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlightHooks for Recorder {
    async fn on_hit(&self, _value: &[u8], ctx: &HitContext) -> Result<(), BoxedError> {
        self.events.lock().unwrap().push(format!("hit:{}", ctx.key));
        Ok(())
    }

    async fn on_leader(&self, _value: &[u8], ctx: &LeaderContext) -> Result<(), BoxedError> {
        self.events.lock().unwrap().push(format!("leader:cached={}", ctx.cached));
        if self.fail_on_leader {
            return Err("leader hook failed".to_string().into());
        }
        Ok(())
    }

    async fn on_follower_wait(&self, ctx: &FollowerWaitContext) -> Result<(), BoxedError> {
        self.events.lock().unwrap().push(format!("follower_wait:{:?}", ctx.outcome));
        Ok(())
    }

    async fn on_fallback(&self, _value: &[u8], ctx: &FallbackContext) -> Result<(), BoxedError> {
        self.events.lock().unwrap().push(format!("fallback:waited={}", ctx.waited_ms));
        Ok(())
    }
}

#[tokio::test]
async fn each_outcome_fires_its_hooks_exactly_once() {
    let fx = simulated_fixture();
    let recorder = Arc::new(Recorder::default());

    // Leader path.
    let call = CallOptions {
        hooks: Some(recorder.clone()),
        ..CallOptions::default()
    };
    fx.flights.get_or_set("k", |_ctx| async { Ok(b"v".to_vec()) }, call).await.unwrap();
    assert_eq!(recorder.events(), vec!["leader:cached=true".to_string()]);

    // Hit path.
    let call = CallOptions {
        hooks: Some(recorder.clone()),
        ..CallOptions::default()
    };
    fx.flights.get_or_set("k", |_ctx| async { Ok(b"X".to_vec()) }, call).await.unwrap();
    assert_eq!(recorder.events(), vec!["leader:cached=true".to_string(), "hit:k".to_string()]);

    // Follower fallback path (foreign lease, no budget).
    fx.leases.acquire("k2", "other-owner", 600_000).await.unwrap();
    let call = CallOptions {
        hooks: Some(recorder.clone()),
        wait_max_ms: Some(0),
        ..CallOptions::default()
    };
    fx.flights.get_or_set("k2", |_ctx| async { Ok(b"v".to_vec()) }, call).await.unwrap();
    assert_eq!(recorder.events(), vec![
        "leader:cached=true".to_string(),
        "hit:k".to_string(),
        "follower_wait:Fallback".to_string(),
        "fallback:waited=0".to_string(),
    ]);
}

#[tokio::test]
async fn leader_hook_failure_surfaces_after_release() {
    let fx = simulated_fixture();
    let recorder = Arc::new(Recorder {
        events: Mutex::new(Vec::new()),
        fail_on_leader: true,
    });

    let call = CallOptions {
        hooks: Some(recorder.clone()),
        ..CallOptions::default()
    };
    let err = fx
        .flights
        .get_or_set("k", |_ctx| async { Ok(b"v".to_vec()) }, call)
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "HOOK_FAILED");
    assert!(fx.leases.record("k").await.is_none(), "release happens regardless of hook outcome");
    assert_eq!(fx.cache.get("k").await.unwrap(), Some(b"v".to_vec()), "the cache write is not undone");
}
