//! Phase-tagged execution of side-effecting steps.
//!
//! Every backend call, user callable and sleep runs under a [`Phase`]: the
//! runner opens a tracing span carrying `{phase, key, adapter}` and maps raw
//! failures to the tagged error kind for that phase, preserving the original
//! as `source`. Errors that are already tagged pass through unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use corral_core::AcquireResult;
use corral_core::BoxedError;
use corral_core::Cache;
use corral_core::FlightError;
use corral_core::Leases;
use corral_core::Phase;
use corral_core::ReadyState;
use corral_core::error::CacheGetSnafu;
use corral_core::error::CacheSetSnafu;
use corral_core::error::LeaseAcquireSnafu;
use corral_core::error::LeaseReadySnafu;
use corral_time::Clock;
use snafu::ResultExt;
use tracing::Instrument;

use crate::strategy::WaitContext;
use crate::strategy::WaitStrategy;

/// Span for a phase without an adapter attribute (user callables, sleeps).
pub(crate) fn phase_span(phase: Phase, key: &str) -> tracing::Span {
    tracing::debug_span!("cache_locking", phase = phase.as_str(), key = %key)
}

/// Span for an adapter-backed phase.
pub(crate) fn adapter_phase_span(phase: Phase, key: &str, adapter: &str) -> tracing::Span {
    tracing::debug_span!("cache_locking", phase = phase.as_str(), key = %key, adapter = %adapter)
}

/// Runs each step of a single call under its phase.
pub(crate) struct PhaseRunner {
    key: String,
}

impl PhaseRunner {
    pub(crate) fn new(key: String) -> Self {
        Self { key }
    }

    pub(crate) async fn cache_get(&self, cache: &Arc<dyn Cache>) -> Result<Option<Vec<u8>>, FlightError> {
        let span = adapter_phase_span(Phase::CacheGet, &self.key, cache.name());
        cache
            .get(&self.key)
            .instrument(span)
            .await
            .context(CacheGetSnafu {
                key: self.key.as_str(),
                adapter: cache.name(),
            })
    }

    pub(crate) async fn cache_set(
        &self,
        cache: &Arc<dyn Cache>,
        value: &[u8],
        ttl_ms: Option<u64>,
    ) -> Result<(), FlightError> {
        let span = adapter_phase_span(Phase::CacheSet, &self.key, cache.name());
        cache
            .set(&self.key, value, ttl_ms)
            .instrument(span)
            .await
            .context(CacheSetSnafu {
                key: self.key.as_str(),
                adapter: cache.name(),
            })
    }

    pub(crate) async fn lease_acquire(
        &self,
        leases: &Arc<dyn Leases>,
        owner: &str,
        ttl_ms: u64,
    ) -> Result<AcquireResult, FlightError> {
        let span = adapter_phase_span(Phase::LeaseAcquire, &self.key, leases.name());
        leases
            .acquire(&self.key, owner, ttl_ms)
            .instrument(span)
            .await
            .context(LeaseAcquireSnafu {
                key: self.key.as_str(),
                adapter: leases.name(),
            })
    }

    pub(crate) async fn lease_mark_ready(&self, leases: &Arc<dyn Leases>) -> Result<(), FlightError> {
        let span = adapter_phase_span(Phase::LeaseMarkReady, &self.key, leases.name());
        leases.mark_ready(&self.key).instrument(span).await.context(LeaseReadySnafu {
            key: self.key.as_str(),
            adapter: leases.name(),
            phase: Phase::LeaseMarkReady,
        })
    }

    pub(crate) async fn lease_is_ready(&self, leases: &Arc<dyn Leases>) -> Result<Option<ReadyState>, FlightError> {
        let span = adapter_phase_span(Phase::LeaseIsReady, &self.key, leases.name());
        leases.is_ready(&self.key).instrument(span).await.context(LeaseReadySnafu {
            key: self.key.as_str(),
            adapter: leases.name(),
            phase: Phase::LeaseIsReady,
        })
    }

    /// Run the user fetcher. Already-tagged failures pass through unchanged.
    pub(crate) async fn fetch<Fut>(&self, fut: Fut) -> Result<Vec<u8>, FlightError>
    where
        Fut: Future<Output = Result<Vec<u8>, BoxedError>>,
    {
        let span = phase_span(Phase::Fetcher, &self.key);
        match fut.instrument(span).await {
            Ok(value) => Ok(value),
            Err(source) => {
                let key = self.key.clone();
                Err(FlightError::wrap_user(source, |source| FlightError::Fetcher { key, source }))
            }
        }
    }

    /// Consult the wait strategy for the next inter-poll delay.
    pub(crate) fn strategy_delay(&self, strategy: &dyn WaitStrategy, ctx: &WaitContext) -> Result<u64, FlightError> {
        let _span = phase_span(Phase::WaitStrategy, &self.key).entered();
        match strategy.next_delay_ms(ctx) {
            Ok(delay_ms) => Ok(delay_ms),
            Err(source) => {
                let key = self.key.clone();
                Err(FlightError::wrap_user(source, |source| FlightError::Strategy { key, source }))
            }
        }
    }

    /// Sleep between polls.
    pub(crate) async fn sleep(&self, clock: &Arc<dyn Clock>, delay_ms: u64) {
        let span = phase_span(Phase::WaitSleep, &self.key);
        clock.sleep(Duration::from_millis(delay_ms)).instrument(span).await;
    }
}
