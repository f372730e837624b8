//! Configuration for the facade and per-call overrides.
//!
//! [`Options`] carries instance-level defaults plus the adapter wiring;
//! [`CallOptions`] carries per-call overrides. Resolution validates inputs
//! once, merges overrides onto defaults and produces an immutable
//! [`ResolvedCall`] the runtime consumes.

use std::sync::Arc;

use corral_core::FlightError;
use corral_core::Leases;
use corral_core::MAX_KEY_SIZE;
use corral_core::MAX_OWNER_ID_SIZE;
use corral_core::error::ValidationSnafu;
use corral_time::Clock;
use snafu::ensure;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterSpec;
use crate::hooks::FlightHooks;
use crate::hooks::HookRunner;
use crate::strategy::FixedDelay;
use crate::strategy::WaitStrategy;

/// Default lease TTL: how long a leader may hold the lease.
pub const DEFAULT_LEASE_TTL_MS: u64 = 15_000;

/// Default follower wait budget.
pub const DEFAULT_WAIT_MAX_MS: u64 = 4_000;

/// Default base inter-poll step.
pub const DEFAULT_WAIT_STEP_MS: u64 = 250;

/// Cache-acceptance predicate: decides whether a leader's fetched value is
/// written to the cache. Must be side-effect-free; invoked exactly once.
pub type ShouldCache = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Instance-level configuration for [`SingleFlight`](crate::SingleFlight).
pub struct Options {
    /// Storage backends, as instances or a descriptor.
    pub adapter: AdapterSpec,
    /// Explicit lease backend; overrides whatever the adapter provides.
    pub leases: Option<Arc<dyn Leases>>,
    /// Clock injection; defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
    /// Default lease TTL in milliseconds.
    pub lease_ttl_ms: u64,
    /// Default follower wait budget in milliseconds.
    pub wait_max_ms: u64,
    /// Default base inter-poll step in milliseconds.
    pub wait_step_ms: u64,
    /// Default cache entry TTL; `None` writes entries without expiry.
    pub cache_ttl_ms: Option<u64>,
    /// Instance-level hooks, run before per-call hooks for each event.
    pub hooks: Option<Arc<dyn FlightHooks>>,
    /// Validate inputs on every call. Turn off for hot paths once the
    /// application has asserted shapes; malformed input then surfaces at
    /// first downstream misuse.
    pub validate: bool,
}

impl Options {
    /// Options with stock defaults for the given adapter.
    pub fn new(adapter: AdapterSpec) -> Self {
        Self {
            adapter,
            leases: None,
            clock: None,
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
            wait_max_ms: DEFAULT_WAIT_MAX_MS,
            wait_step_ms: DEFAULT_WAIT_STEP_MS,
            cache_ttl_ms: None,
            hooks: None,
            validate: true,
        }
    }
}

/// Per-call overrides; every `None` inherits the instance default.
#[derive(Default)]
pub struct CallOptions {
    /// Override the lease TTL.
    pub lease_ttl_ms: Option<u64>,
    /// Override the follower wait budget.
    pub wait_max_ms: Option<u64>,
    /// Override the base inter-poll step.
    pub wait_step_ms: Option<u64>,
    /// Override the cache entry TTL.
    pub cache_ttl_ms: Option<u64>,
    /// Owner id for the lease; freshly generated when absent. Must be
    /// stable for the duration of the call and unique across callers.
    pub owner_id: Option<String>,
    /// Cache-acceptance predicate; defaults to always-cache.
    pub should_cache: Option<ShouldCache>,
    /// Inter-poll delay strategy; defaults to [`FixedDelay`].
    pub wait_strategy: Option<Arc<dyn WaitStrategy>>,
    /// External cancellation signal.
    pub cancel: Option<CancellationToken>,
    /// Per-call hooks, run after the instance hooks for each event.
    pub hooks: Option<Arc<dyn FlightHooks>>,
}

/// Instance defaults kept by the facade after construction.
pub(crate) struct InstanceDefaults {
    pub lease_ttl_ms: u64,
    pub wait_max_ms: u64,
    pub wait_step_ms: u64,
    pub cache_ttl_ms: Option<u64>,
    pub hooks: Option<Arc<dyn FlightHooks>>,
    pub validate: bool,
}

/// Immutable, fully merged inputs for one `get_or_set` call.
pub(crate) struct ResolvedCall {
    pub key: String,
    pub owner_id: String,
    pub lease_ttl_ms: u64,
    pub wait_max_ms: u64,
    pub wait_step_ms: u64,
    pub cache_ttl_ms: Option<u64>,
    pub should_cache: ShouldCache,
    pub strategy: Arc<dyn WaitStrategy>,
    pub cancel: Option<CancellationToken>,
    pub hooks: HookRunner,
}

impl std::fmt::Debug for ResolvedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCall")
            .field("key", &self.key)
            .field("owner_id", &self.owner_id)
            .field("lease_ttl_ms", &self.lease_ttl_ms)
            .field("wait_max_ms", &self.wait_max_ms)
            .field("wait_step_ms", &self.wait_step_ms)
            .field("cache_ttl_ms", &self.cache_ttl_ms)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh owner id, unique enough to make ownership-checked
/// release safe across concurrent callers.
pub(crate) fn generate_owner_id() -> String {
    format!("owner-{:016x}", rand::random::<u64>())
}

/// Validate and merge one call's inputs onto the instance defaults.
pub(crate) fn resolve_call(defaults: &InstanceDefaults, key: &str, call: CallOptions) -> Result<ResolvedCall, FlightError> {
    if defaults.validate {
        ensure!(!key.is_empty(), ValidationSnafu { reason: "key must not be empty" });
        ensure!(key.len() <= MAX_KEY_SIZE, ValidationSnafu {
            reason: format!("key size {} exceeds maximum of {} bytes", key.len(), MAX_KEY_SIZE),
        });
        if let Some(owner_id) = &call.owner_id {
            ensure!(!owner_id.is_empty(), ValidationSnafu {
                reason: "owner_id must not be empty",
            });
            ensure!(owner_id.len() <= MAX_OWNER_ID_SIZE, ValidationSnafu {
                reason: format!("owner_id size {} exceeds maximum of {} bytes", owner_id.len(), MAX_OWNER_ID_SIZE),
            });
        }
    }

    Ok(ResolvedCall {
        key: key.to_string(),
        owner_id: call.owner_id.unwrap_or_else(generate_owner_id),
        lease_ttl_ms: call.lease_ttl_ms.unwrap_or(defaults.lease_ttl_ms),
        wait_max_ms: call.wait_max_ms.unwrap_or(defaults.wait_max_ms),
        wait_step_ms: call.wait_step_ms.unwrap_or(defaults.wait_step_ms),
        cache_ttl_ms: call.cache_ttl_ms.or(defaults.cache_ttl_ms),
        should_cache: call.should_cache.unwrap_or_else(|| Arc::new(|_value: &[u8]| true)),
        strategy: call.wait_strategy.unwrap_or_else(|| Arc::new(FixedDelay)),
        cancel: call.cancel,
        hooks: HookRunner::new(defaults.hooks.clone(), call.hooks),
    })
}
