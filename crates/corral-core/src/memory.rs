//! Deterministic in-memory backends.
//!
//! Reference implementations of the [`Cache`] and [`Leases`] contracts,
//! thread-safe and clock-injected so lease expiry and cache TTL are testable
//! without real sleeps. They also serve as the `memory` adapter descriptor
//! backend for single-process deployments.
//!
//! Operation counters are exposed for tests that assert the runtime's
//! call-count contract (e.g. "a hit never touches the lease store").

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use corral_time::Clock;
use tokio::sync::Mutex;

use crate::error::AdapterError;
use crate::traits::Cache;
use crate::traits::Leases;
use crate::types::AcquireResult;
use crate::types::LeaseRecord;
use crate::types::ReadyState;

const MEMORY_BACKEND_NAME: &str = "memory";

/// A cache slot with optional absolute expiry.
#[derive(Debug, Clone)]
struct CacheSlot {
    value: Vec<u8>,
    expires_at_ms: Option<u64>,
}

impl CacheSlot {
    fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at_ms {
            Some(expires_at_ms) => now_ms >= expires_at_ms,
            None => false,
        }
    }
}

/// Deterministic in-memory cache.
///
/// Expired entries are removed lazily on read, so a `get` after expiry
/// behaves exactly like a miss.
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheSlot>>,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl MemoryCache {
    /// Create a new in-memory cache wrapped in `Arc`.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        })
    }

    /// Number of `get` calls served so far.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `set` calls served so far.
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    /// Seed an entry directly, bypassing the counters. Test helper.
    pub async fn insert_raw(&self, key: impl Into<String>, value: Vec<u8>, ttl_ms: Option<u64>) {
        let expires_at_ms = ttl_ms.map(|ttl| self.clock.now_unix_ms().saturating_add(ttl));
        self.entries.lock().await.insert(key.into(), CacheSlot { value, expires_at_ms });
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        MEMORY_BACKEND_NAME
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let now_ms = self.clock.now_unix_ms();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(slot) if slot.is_expired(now_ms) => {
                entries.remove(key);
                Ok(None)
            }
            Some(slot) => Ok(Some(slot.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_ms: Option<u64>) -> Result<(), AdapterError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        let expires_at_ms = ttl_ms.map(|ttl| self.clock.now_unix_ms().saturating_add(ttl));
        self.entries.lock().await.insert(key.to_string(), CacheSlot {
            value: value.to_vec(),
            expires_at_ms,
        });
        Ok(())
    }
}

/// Deterministic in-memory lease store.
///
/// Acquire and release each run inside one mutex-guarded critical section,
/// which is what gives them the required CAS semantics within a process.
pub struct MemoryLeases {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, LeaseRecord>>,
    acquires: AtomicU64,
    releases: AtomicU64,
}

impl MemoryLeases {
    /// Create a new in-memory lease store wrapped in `Arc`.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            records: Mutex::new(HashMap::new()),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        })
    }

    /// Number of `acquire` calls served so far.
    pub fn acquire_count(&self) -> u64 {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Number of `release` calls served so far.
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Current record for `key`, if any (active or not). Test helper.
    pub async fn record(&self, key: &str) -> Option<LeaseRecord> {
        self.records.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl Leases for MemoryLeases {
    fn name(&self) -> &str {
        MEMORY_BACKEND_NAME
    }

    async fn acquire(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<AcquireResult, AdapterError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let now_ms = self.clock.now_unix_ms();
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(record) if record.is_active(now_ms) => Ok(AcquireResult::Follower {
                lease_until_ms: record.lease_until_ms,
            }),
            _ => {
                let lease_until_ms = now_ms.saturating_add(ttl_ms);
                records.insert(key.to_string(), LeaseRecord::new(owner, lease_until_ms));
                Ok(AcquireResult::Leader { lease_until_ms })
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), AdapterError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().await;
        if records.get(key).is_some_and(|record| record.owner == owner) {
            records.remove(key);
        }
        Ok(())
    }

    async fn mark_ready(&self, key: &str) -> Result<(), AdapterError> {
        let now_ms = self.clock.now_unix_ms();
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(key) {
            if record.is_active(now_ms) {
                record.ready = true;
            }
        }
        Ok(())
    }

    async fn is_ready(&self, key: &str) -> Result<Option<ReadyState>, AdapterError> {
        let now_ms = self.clock.now_unix_ms();
        let records = self.records.lock().await;
        let state = match records.get(key) {
            Some(record) if record.is_active(now_ms) => ReadyState {
                ready: record.ready,
                expired: false,
            },
            _ => ReadyState {
                ready: false,
                expired: true,
            },
        };
        Ok(Some(state))
    }
}
