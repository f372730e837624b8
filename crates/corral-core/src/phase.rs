//! Named side-effecting steps of the coordination flow.
//!
//! Every I/O step, callback and sleep in a `get_or_set` call runs under one
//! of these phases. The string forms are stable identifiers: they appear in
//! error context and on tracing spans, and downstream tooling keys on them.

use serde::Deserialize;
use serde::Serialize;

/// A named step of the coordination flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Input validation, before any I/O.
    Validation,
    /// Cache probe or follower poll read.
    CacheGet,
    /// Leader cache write.
    CacheSet,
    /// Atomic lease acquisition.
    LeaseAcquire,
    /// Lease release (compare-and-delete).
    LeaseRelease,
    /// Leader marking its lease ready.
    LeaseMarkReady,
    /// Follower readiness probe.
    LeaseIsReady,
    /// User fetcher execution.
    Fetcher,
    /// `on_hit` hook.
    HookOnHit,
    /// `on_leader` hook.
    HookOnLeader,
    /// `on_follower_wait` hook.
    HookOnFollowerWait,
    /// `on_fallback` hook.
    HookOnFallback,
    /// Wait strategy delay computation.
    WaitStrategy,
    /// Inter-poll sleep in the follower loop.
    WaitSleep,
    /// Cancellation observed.
    Abort,
}

impl Phase {
    /// Stable string identifier for traces and error context.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validation => "validation",
            Phase::CacheGet => "cache.get",
            Phase::CacheSet => "cache.set",
            Phase::LeaseAcquire => "leases.acquire",
            Phase::LeaseRelease => "leases.release",
            Phase::LeaseMarkReady => "leases.markReady",
            Phase::LeaseIsReady => "leases.isReady",
            Phase::Fetcher => "fetcher",
            Phase::HookOnHit => "hooks.onHit",
            Phase::HookOnLeader => "hooks.onLeader",
            Phase::HookOnFollowerWait => "hooks.onFollowerWait",
            Phase::HookOnFallback => "hooks.onFallback",
            Phase::WaitStrategy => "waitStrategy",
            Phase::WaitSleep => "wait.sleep",
            Phase::Abort => "abort",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
