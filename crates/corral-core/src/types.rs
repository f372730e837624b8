//! Shared types for single-flight coordination.
//!
//! The lease record is serialized as JSON for human readability and
//! debugging; external stores persist exactly this shape.

use serde::Deserialize;
use serde::Serialize;

/// Lease record stored in the lease backend.
///
/// A record is *active* iff `lease_until_ms > now`. An expired record is
/// logically absent: acquirers overwrite it, readiness probes report it as
/// expired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Unique identifier of the lease holder.
    pub owner: String,
    /// Absolute expiry in Unix milliseconds.
    pub lease_until_ms: u64,
    /// Set by the leader once its work has concluded (with or without a
    /// cache write), so followers can stop waiting early.
    pub ready: bool,
}

impl LeaseRecord {
    /// Create a fresh, not-yet-ready record.
    pub fn new(owner: impl Into<String>, lease_until_ms: u64) -> Self {
        Self {
            owner: owner.into(),
            lease_until_ms,
            ready: false,
        }
    }

    /// Whether the record is active at `now_ms`.
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.lease_until_ms > now_ms
    }

    /// Remaining lifetime in milliseconds (0 if expired).
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.lease_until_ms.saturating_sub(now_ms)
    }
}

/// Result of an atomic lease acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// The caller now holds the lease.
    Leader {
        /// This holder's expiry in Unix milliseconds.
        lease_until_ms: u64,
    },
    /// Another caller holds the lease.
    Follower {
        /// The incumbent holder's expiry in Unix milliseconds. Diagnostic
        /// only; the follower must not assume safety at that instant.
        lease_until_ms: u64,
    },
}

impl AcquireResult {
    /// The current holder's expiry, whoever that is.
    pub fn lease_until_ms(&self) -> u64 {
        match self {
            AcquireResult::Leader { lease_until_ms } | AcquireResult::Follower { lease_until_ms } => *lease_until_ms,
        }
    }

    /// Whether this caller became the leader.
    pub fn is_leader(&self) -> bool {
        matches!(self, AcquireResult::Leader { .. })
    }
}

/// Lease readiness as observed by a follower.
///
/// `ready` is only meaningful while `expired` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyState {
    /// The leader has marked its work concluded.
    pub ready: bool,
    /// The lease record is gone or past expiry.
    pub expired: bool,
}

/// Externally visible classification of a `get_or_set` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The cache returned a value before any lease was tried.
    Hit,
    /// This call acquired the lease, fetched, cached and released.
    MissLeader,
    /// The leader fetched but the cache-acceptance predicate declined.
    MissLeaderNocache,
    /// A follower found the cached value while waiting.
    MissFollowerHit,
    /// A follower exhausted its wait budget and fetched itself.
    MissFollowerFallback,
}

impl Outcome {
    /// Stable string code for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "HIT",
            Outcome::MissLeader => "MISS-LEADER",
            Outcome::MissLeaderNocache => "MISS-LEADER-NOCACHE",
            Outcome::MissFollowerHit => "MISS-FOLLOWER-HIT",
            Outcome::MissFollowerFallback => "MISS-FOLLOWER-FALLBACK",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing how a `get_or_set` call concluded.
///
/// `lease_until_ms` and `waited_ms` are `None` exactly for [`Outcome::Hit`];
/// leaders report `waited_ms` of 0, followers the measured wait-loop time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightMeta {
    /// Outcome classification.
    pub outcome: Outcome,
    /// Expiry of the lease this call acquired or observed.
    pub lease_until_ms: Option<u64>,
    /// Time spent in the follower wait loop.
    pub waited_ms: Option<u64>,
}

impl FlightMeta {
    /// Metadata for a cache hit: no lease was touched.
    pub fn hit() -> Self {
        Self {
            outcome: Outcome::Hit,
            lease_until_ms: None,
            waited_ms: None,
        }
    }
}

/// Value plus metadata returned by `get_or_set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightResult {
    /// The fetched or cached payload. Opaque bytes; serialization is the
    /// caller's concern.
    pub value: Vec<u8>,
    /// How the value was obtained.
    pub meta: FlightMeta,
}

/// Convert a millisecond TTL to whole seconds for second-granularity
/// backends.
///
/// Rounds up, and never rounds a positive sub-second TTL down to zero (zero
/// in most stores means "no expiry", which would invert the caller's
/// intent). Backends with coarser minimums (e.g. 60s) layer their own policy
/// on top.
pub fn ttl_ms_to_secs_ceil(ttl_ms: u64) -> u64 {
    if ttl_ms == 0 {
        return 0;
    }
    ttl_ms.div_ceil(1000).max(1)
}
