//! Distributed single-flight coordination for caches.
//!
//! On a cache miss under concurrency, only one caller (the leader) should
//! perform the expensive fetch; the others (followers) wait a bounded time
//! for the leader's cached result and fall back to their own fetch only when
//! the wait is exhausted. Correctness across processes comes from a
//! short-lived lease held in shared state with an atomic compare-and-set
//! acquire, so the coordination works across machines, not only within one
//! address space.
//!
//! This crate is the coordination runtime; storage is abstracted behind the
//! [`Cache`] and [`Leases`] traits from `corral-core`. The in-memory
//! backends are built in; external stores implement the traits out of tree.
//!
//! Single-flight is best effort: if the leader finishes within the wait
//! budget and caches, exactly one fetch occurs. Under lease expiry,
//! eventually consistent caches or exhausted budgets, bounded duplication is
//! accepted by design.
//!
//! ## Example
//!
//! ```ignore
//! use corral::{AdapterSpec, CallOptions, Options, SingleFlight};
//!
//! let flights = SingleFlight::new(Options::new(AdapterSpec::memory()))?;
//!
//! let result = flights
//!     .get_or_set(
//!         "user:42",
//!         |_ctx| async { expensive_fetch().await },
//!         CallOptions {
//!             cache_ttl_ms: Some(5_000),
//!             ..CallOptions::default()
//!         },
//!     )
//!     .await?;
//!
//! // result.meta.outcome is one of HIT, MISS-LEADER, MISS-LEADER-NOCACHE,
//! // MISS-FOLLOWER-HIT, MISS-FOLLOWER-FALLBACK.
//! ```

#![warn(missing_docs)]

use std::future::Future;
use std::sync::Arc;

use corral_core::error::ValidationSnafu;

mod adapter;
mod cancel;
mod hooks;
mod options;
mod phase_runner;
mod runtime;
mod strategy;

pub use adapter::AdapterDescriptor;
pub use adapter::AdapterKind;
pub use adapter::AdapterSpec;
pub use corral_core::AcquireResult;
pub use corral_core::AdapterError;
pub use corral_core::BoxedError;
pub use corral_core::Cache;
pub use corral_core::FlightError;
pub use corral_core::FlightMeta;
pub use corral_core::FlightResult;
pub use corral_core::LeaseRecord;
pub use corral_core::Leases;
pub use corral_core::MemoryCache;
pub use corral_core::MemoryLeases;
pub use corral_core::Outcome;
pub use corral_core::Phase;
pub use corral_core::ReadyState;
pub use corral_time::Clock;
pub use corral_time::SimulatedClock;
pub use corral_time::SystemClock;
pub use hooks::FallbackContext;
pub use hooks::FlightHooks;
pub use hooks::FollowerWaitContext;
pub use hooks::FollowerWaitOutcome;
pub use hooks::HitContext;
pub use hooks::LeaderContext;
pub use options::CallOptions;
pub use options::DEFAULT_LEASE_TTL_MS;
pub use options::DEFAULT_WAIT_MAX_MS;
pub use options::DEFAULT_WAIT_STEP_MS;
pub use options::Options;
pub use options::ShouldCache;
pub use runtime::FetchContext;
pub use strategy::ExponentialBackoff;
pub use strategy::FixedDelay;
pub use strategy::WaitContext;
pub use strategy::WaitStrategy;
pub use tokio_util::sync::CancellationToken;

use crate::options::InstanceDefaults;
use crate::runtime::FlightRuntime;

/// Single-flight coordinator over a cache and a lease store.
///
/// Construction resolves the adapter wiring once; every
/// [`get_or_set`](Self::get_or_set) call is then independent, holding no
/// per-key state in this process.
pub struct SingleFlight {
    cache: Arc<dyn Cache>,
    leases: Arc<dyn Leases>,
    clock: Arc<dyn Clock>,
    defaults: InstanceDefaults,
}

impl std::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight").finish_non_exhaustive()
    }
}

impl SingleFlight {
    /// Validate the configuration and resolve the storage backends.
    ///
    /// Fails with `VALIDATION_ERROR` when no lease backend is available
    /// from either the adapter or [`Options::leases`].
    pub fn new(options: Options) -> Result<Self, FlightError> {
        let clock: Arc<dyn Clock> = options.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let resolved = adapter::resolve_adapter(&options.adapter, &clock);

        let Some(leases) = options.leases.or(resolved.leases) else {
            return ValidationSnafu {
                reason: "no lease backend: the adapter provides none and `leases` was not set",
            }
            .fail();
        };

        Ok(Self {
            cache: resolved.cache,
            leases,
            clock,
            defaults: InstanceDefaults {
                lease_ttl_ms: options.lease_ttl_ms,
                wait_max_ms: options.wait_max_ms,
                wait_step_ms: options.wait_step_ms,
                cache_ttl_ms: options.cache_ttl_ms,
                hooks: options.hooks,
                validate: options.validate,
            },
        })
    }

    /// Fetch-or-coordinate a value for `key`.
    ///
    /// The fetcher runs at most once per call: on the leader path, or on the
    /// follower fallback path after the wait budget is exhausted. It
    /// receives a [`FetchContext`] whose token is cancelled together with
    /// the surrounding call.
    pub async fn get_or_set<F, Fut>(&self, key: &str, fetcher: F, call: CallOptions) -> Result<FlightResult, FlightError>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>> + Send,
    {
        let resolved = options::resolve_call(&self.defaults, key, call)?;
        let cancel = resolved.cancel.clone();
        let runtime = FlightRuntime::new(self.cache.clone(), self.leases.clone(), self.clock.clone());

        cancel::race_with_cancel(key, cancel, runtime.get_or_set(resolved, fetcher)).await
    }

    /// The cache backend this instance coordinates over.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// The lease backend this instance coordinates through.
    pub fn leases(&self) -> &Arc<dyn Leases> {
        &self.leases
    }
}
