//! Backend traits for single-flight coordination.
//!
//! The runtime talks to storage exclusively through [`Cache`] and
//! [`Leases`]. Everything the coordination algorithm relies on is stated
//! here; anything a concrete store does beyond this contract (connection
//! pooling, retries, serialization of the lease record) is the adapter's
//! business.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::types::AcquireResult;
use crate::types::ReadyState;

/// Byte/value storage with optional per-entry TTL.
///
/// The runtime calls `get` at most once before lease acquisition, once per
/// follower poll iteration plus one final read, and `set` exactly once per
/// successful leader fetch that passes the cache-acceptance predicate.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Backend name for diagnostics (error context, span attributes).
    fn name(&self) -> &str;

    /// Read a value.
    ///
    /// Returns `None` for missing **or** expired entries; must never return
    /// a stale value. How expiry is enforced (server-side TTL, lazy
    /// deletion) is the adapter's problem.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError>;

    /// Write a value.
    ///
    /// `ttl_ms` of `None` means no expiry; an overwrite with `None` must
    /// also clear any previous expiry. Second-granularity backends convert
    /// with [`ttl_ms_to_secs_ceil`](crate::types::ttl_ms_to_secs_ceil).
    async fn set(&self, key: &str, value: &[u8], ttl_ms: Option<u64>) -> Result<(), AdapterError>;
}

#[async_trait]
impl<T: Cache + ?Sized> Cache for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_ms: Option<u64>) -> Result<(), AdapterError> {
        (**self).set(key, value, ttl_ms).await
    }
}

/// Atomic single-holder lease primitive with optional readiness signal.
///
/// The acquire/release pair is what makes cross-process single-flight work;
/// the atomicity requirements below are load-bearing.
#[async_trait]
pub trait Leases: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Atomically acquire the lease for `key`.
    ///
    /// MUST be a compare-and-set: if no active record exists (expired
    /// records count as absent), create `(owner, now + ttl_ms, ready =
    /// false)` and report [`AcquireResult::Leader`]; otherwise report
    /// [`AcquireResult::Follower`] with the incumbent's expiry. Contention
    /// is not an error.
    async fn acquire(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<AcquireResult, AdapterError>;

    /// Delete the record only if it is currently held by `owner`
    /// (compare-and-delete). No-op when held by someone else or absent.
    async fn release(&self, key: &str, owner: &str) -> Result<(), AdapterError>;

    /// Set the readiness flag on the active record. Optional capability;
    /// the default is a no-op so backends without a readiness column work
    /// unchanged.
    async fn mark_ready(&self, _key: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Observe readiness. `None` means the capability is unsupported;
    /// `Some` with `expired = true` means no active record exists.
    async fn is_ready(&self, _key: &str) -> Result<Option<ReadyState>, AdapterError> {
        Ok(None)
    }
}

#[async_trait]
impl<T: Leases + ?Sized> Leases for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn acquire(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<AcquireResult, AdapterError> {
        (**self).acquire(key, owner, ttl_ms).await
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), AdapterError> {
        (**self).release(key, owner).await
    }

    async fn mark_ready(&self, key: &str) -> Result<(), AdapterError> {
        (**self).mark_ready(key).await
    }

    async fn is_ready(&self, key: &str) -> Result<Option<ReadyState>, AdapterError> {
        (**self).is_ready(key).await
    }
}
