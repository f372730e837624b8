//! Time capability for corral coordination.
//!
//! The follower wait loop and every lease-expiry decision read wall time and
//! sleep between polls. Both go through the [`Clock`] trait so the whole
//! runtime can be driven deterministically in tests: [`SystemClock`] for
//! production, [`SimulatedClock`] for tests that advance time explicitly.
//!
//! Elapsed-time computations in callers must use `saturating_sub`; the clock
//! only promises that time does not decrease between two reads from the same
//! provider instance.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before the UNIX epoch (should never happen on
/// properly configured systems, but prevents panics).
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Injectable wall-time and sleep source.
///
/// One capability covers both reads and sleeps: the follower poll loop has to
/// observe the *same* notion of time it sleeps through, otherwise a simulated
/// test could sleep in real time while expiry math runs on fake time.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;

    /// Suspend the caller for the given duration.
    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_unix_ms(&self) -> u64 {
        (**self).now_unix_ms()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Production clock backed by the system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock for deterministic tests.
///
/// Time only moves when a test calls [`advance_ms`](Self::advance_ms) /
/// [`set_ms`](Self::set_ms) or when a task sleeps through this clock: sleeps
/// return immediately after advancing the simulated time by the requested
/// duration, so a bounded wait loop runs to completion without real delay.
///
/// Clones share the underlying time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current_time_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    /// Create a simulated clock starting at the given timestamp.
    pub fn new(initial_time_ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(initial_time_ms)),
        }
    }

    /// Create a simulated clock starting at the current system time.
    pub fn from_system_time() -> Self {
        Self::new(current_time_ms())
    }

    /// Advance time by the given number of milliseconds.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.current_time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the current time to a specific value.
    pub fn set_ms(&self, time_ms: u64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::from_system_time()
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_ms(duration.as_millis() as u64);
        // Let concurrently scheduled tasks observe the new time.
        tokio::task::yield_now().await;
    }
}
