//! Error taxonomy for single-flight coordination.
//!
//! Uses snafu for structured error handling with context. Two layers:
//!
//! - [`AdapterError`] is what storage backends raise. It knows the backend
//!   name, the operation and the key, nothing about coordination.
//! - [`FlightError`] is the tagged taxonomy callers see. The runtime's phase
//!   runner maps adapter failures to the variant for the phase that was
//!   executing, preserving the original as `source`.
//!
//! Each [`FlightError`] carries a stable [`tag`](FlightError::tag) and the
//! [`Phase`] it occurred in; both string forms are part of the public
//! contract and must not change.

use snafu::Snafu;

use crate::phase::Phase;

/// Boxed error type for user-supplied callables (fetchers, hooks, wait
/// strategies) and adapter causes.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for coordination operations.
pub type Result<T, E = FlightError> = std::result::Result<T, E>;

/// Errors raised by storage backends ([`Cache`](crate::traits::Cache) and
/// [`Leases`](crate::traits::Leases) implementations).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AdapterError {
    /// The backend operation failed.
    #[snafu(display("{backend} {operation} failed for key '{key}': {source}"))]
    Backend {
        /// Backend name, e.g. "memory" or "redis".
        backend: String,
        /// Operation that failed, e.g. "get" or "acquire".
        operation: String,
        /// Key the operation targeted.
        key: String,
        /// Underlying client error.
        source: BoxedError,
    },

    /// The backend does not support the operation.
    #[snafu(display("{backend} backend does not support {operation}"))]
    Unsupported {
        /// Backend name.
        backend: String,
        /// Name of the unsupported operation.
        operation: String,
    },
}

/// Errors surfaced by `get_or_set`.
///
/// Every variant maps to a stable tag (see [`tag`](Self::tag)) and to the
/// [`Phase`] in which it occurred (see [`phase`](Self::phase)).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FlightError {
    /// Caller input failed validation; raised before any I/O.
    #[snafu(display("invalid options: {reason}"))]
    Validation {
        /// What was invalid.
        reason: String,
    },

    /// The cache probe or a follower poll read failed.
    #[snafu(display("cache get failed for key '{key}': {source}"))]
    CacheGet {
        /// Key being read.
        key: String,
        /// Backend name.
        adapter: String,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// The leader's cache write failed.
    #[snafu(display("cache set failed for key '{key}': {source}"))]
    CacheSet {
        /// Key being written.
        key: String,
        /// Backend name.
        adapter: String,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// Lease acquisition failed (the atomic CAS itself errored; contention is
    /// not an error, it makes the caller a follower).
    #[snafu(display("lease acquire failed for key '{key}': {source}"))]
    LeaseAcquire {
        /// Lease key.
        key: String,
        /// Backend name.
        adapter: String,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// Lease release failed.
    ///
    /// The runtime swallows this on the leader path (expiry cleans up a dead
    /// lease); the variant exists for diagnostics and for backends that
    /// expose release directly.
    #[snafu(display("lease release failed for key '{key}': {source}"))]
    LeaseRelease {
        /// Lease key.
        key: String,
        /// Backend name.
        adapter: String,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// A readiness operation (`mark_ready` / `is_ready`) failed.
    #[snafu(display("lease readiness {phase} failed for key '{key}': {source}"))]
    LeaseReady {
        /// Lease key.
        key: String,
        /// Backend name.
        adapter: String,
        /// Which readiness operation was running.
        phase: Phase,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// The user fetcher returned an error.
    #[snafu(display("fetcher failed for key '{key}': {source}"))]
    Fetcher {
        /// Key being fetched.
        key: String,
        /// Error returned by the fetcher.
        source: BoxedError,
    },

    /// A user hook returned an error. Hook failures abort the call.
    #[snafu(display("hook {phase} failed for key '{key}': {source}"))]
    Hook {
        /// Key of the call.
        key: String,
        /// Which hook failed.
        phase: Phase,
        /// Error returned by the hook.
        source: BoxedError,
    },

    /// The wait strategy failed to produce a delay.
    #[snafu(display("wait strategy failed for key '{key}': {source}"))]
    Strategy {
        /// Key of the call.
        key: String,
        /// Error returned by the strategy.
        source: BoxedError,
    },

    /// The inter-poll wait itself failed.
    #[snafu(display("wait failed for key '{key}': {reason}"))]
    Wait {
        /// Key of the call.
        key: String,
        /// What went wrong while waiting.
        reason: String,
    },

    /// The call was cancelled.
    #[snafu(display("aborted during {phase} for key '{key}'"))]
    Aborted {
        /// Key of the call.
        key: String,
        /// Phase in which cancellation was observed.
        phase: Phase,
    },
}

impl FlightError {
    /// Wrap an error from a user-supplied callable, preserving identity.
    ///
    /// A callable that fails with an already-tagged [`FlightError`] (e.g. a
    /// fetcher that itself ran `get_or_set`) is re-raised unchanged instead
    /// of being wrapped a second time.
    pub fn wrap_user(source: BoxedError, wrap: impl FnOnce(BoxedError) -> FlightError) -> FlightError {
        match source.downcast::<FlightError>() {
            Ok(tagged) => *tagged,
            Err(source) => wrap(source),
        }
    }

    /// Stable tag identifying the error kind.
    pub fn tag(&self) -> &'static str {
        match self {
            FlightError::Validation { .. } => "VALIDATION_ERROR",
            FlightError::CacheGet { .. } => "CACHE_GET_FAILED",
            FlightError::CacheSet { .. } => "CACHE_SET_FAILED",
            FlightError::LeaseAcquire { .. } => "LEASE_ACQUIRE_FAILED",
            FlightError::LeaseRelease { .. } => "LEASE_RELEASE_FAILED",
            FlightError::LeaseReady { .. } => "LEASE_READY_FAILED",
            FlightError::Fetcher { .. } => "FETCHER_FAILED",
            FlightError::Hook { .. } => "HOOK_FAILED",
            FlightError::Strategy { .. } => "WAIT_STRATEGY_FAILED",
            FlightError::Wait { .. } => "WAIT_FAILED",
            FlightError::Aborted { .. } => "ABORTED",
        }
    }

    /// Phase in which the error occurred.
    pub fn phase(&self) -> Phase {
        match self {
            FlightError::Validation { .. } => Phase::Validation,
            FlightError::CacheGet { .. } => Phase::CacheGet,
            FlightError::CacheSet { .. } => Phase::CacheSet,
            FlightError::LeaseAcquire { .. } => Phase::LeaseAcquire,
            FlightError::LeaseRelease { .. } => Phase::LeaseRelease,
            FlightError::LeaseReady { phase, .. } => *phase,
            FlightError::Fetcher { .. } => Phase::Fetcher,
            FlightError::Hook { phase, .. } => *phase,
            FlightError::Strategy { .. } => Phase::WaitStrategy,
            FlightError::Wait { .. } => Phase::WaitSleep,
            FlightError::Aborted { phase, .. } => *phase,
        }
    }

    /// Key the failing call targeted, when known.
    pub fn key(&self) -> Option<&str> {
        match self {
            FlightError::Validation { .. } => None,
            FlightError::CacheGet { key, .. }
            | FlightError::CacheSet { key, .. }
            | FlightError::LeaseAcquire { key, .. }
            | FlightError::LeaseRelease { key, .. }
            | FlightError::LeaseReady { key, .. }
            | FlightError::Fetcher { key, .. }
            | FlightError::Hook { key, .. }
            | FlightError::Strategy { key, .. }
            | FlightError::Wait { key, .. }
            | FlightError::Aborted { key, .. } => Some(key),
        }
    }

    /// Backend name, for errors raised by an adapter operation.
    pub fn adapter(&self) -> Option<&str> {
        match self {
            FlightError::CacheGet { adapter, .. }
            | FlightError::CacheSet { adapter, .. }
            | FlightError::LeaseAcquire { adapter, .. }
            | FlightError::LeaseRelease { adapter, .. }
            | FlightError::LeaseReady { adapter, .. } => Some(adapter),
            _ => None,
        }
    }
}
