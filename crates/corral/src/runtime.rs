//! The `get_or_set` state machine.
//!
//! One call is a straight-line sequence of phases:
//!
//! 1. Probe the cache; a hit returns immediately and never touches leases.
//! 2. Atomically acquire the lease; the CAS decides leader vs follower.
//! 3. Leader: fetch, conditionally cache, mark ready, release (always),
//!    then fire `on_leader`.
//! 4. Follower: poll the cache under a bounded budget, take one final look
//!    after the loop, then either consume the leader's value or fall back
//!    to its own fetch.
//!
//! The runtime holds no per-key state; all cross-call coordination is
//! delegated to the lease backend, which keeps calls re-entrant and
//! shardable.

use std::future::Future;
use std::sync::Arc;

use corral_core::AcquireResult;
use corral_core::BoxedError;
use corral_core::Cache;
use corral_core::FlightError;
use corral_core::FlightMeta;
use corral_core::FlightResult;
use corral_core::Leases;
use corral_core::Outcome;
use corral_core::Phase;
use corral_time::Clock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::debug;
use tracing::warn;

use crate::hooks::FallbackContext;
use crate::hooks::FollowerWaitContext;
use crate::hooks::FollowerWaitOutcome;
use crate::hooks::HitContext;
use crate::hooks::LeaderContext;
use crate::options::ResolvedCall;
use crate::phase_runner::PhaseRunner;
use crate::phase_runner::adapter_phase_span;
use crate::strategy::WaitContext;

/// Handed to the fetcher so it can cooperate with cancellation.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Cancelled when the surrounding `get_or_set` call is cancelled.
    pub cancel: CancellationToken,
}

pub(crate) struct FlightRuntime {
    cache: Arc<dyn Cache>,
    leases: Arc<dyn Leases>,
    clock: Arc<dyn Clock>,
}

impl FlightRuntime {
    pub(crate) fn new(cache: Arc<dyn Cache>, leases: Arc<dyn Leases>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, leases, clock }
    }

    pub(crate) async fn get_or_set<F, Fut>(&self, call: ResolvedCall, fetcher: F) -> Result<FlightResult, FlightError>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>> + Send,
    {
        debug_assert!(!call.owner_id.is_empty(), "resolution must produce an owner id");

        let phases = PhaseRunner::new(call.key.clone());

        if let Some(value) = phases.cache_get(&self.cache).await? {
            debug!(key = %call.key, outcome = %Outcome::Hit, "cache hit");
            call.hooks.hit(&value, &HitContext { key: call.key.clone() }).await?;
            return Ok(FlightResult {
                value,
                meta: FlightMeta::hit(),
            });
        }

        match phases.lease_acquire(&self.leases, &call.owner_id, call.lease_ttl_ms).await? {
            AcquireResult::Leader { lease_until_ms } => self.lead(&phases, call, fetcher, lease_until_ms).await,
            AcquireResult::Follower { lease_until_ms } => self.follow(&phases, call, fetcher, lease_until_ms).await,
        }
    }

    /// Leader path: fetch, conditionally cache, mark ready. The lease is
    /// released on every exit path, fetch and hook errors included; release
    /// failures are swallowed because expiry cleans up a dead lease anyway.
    async fn lead<F, Fut>(
        &self,
        phases: &PhaseRunner,
        call: ResolvedCall,
        fetcher: F,
        lease_until_ms: u64,
    ) -> Result<FlightResult, FlightError>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>> + Send,
    {
        let guard = LeaseGuard::new(self.leases.clone(), call.key.clone(), call.owner_id.clone());
        let led = self.lead_inner(phases, &call, fetcher).await;
        guard.release().await;

        let (value, cached) = led?;
        let outcome = if cached { Outcome::MissLeader } else { Outcome::MissLeaderNocache };
        debug!(key = %call.key, outcome = %outcome, lease_until_ms, "leader completed");

        call.hooks
            .leader(&value, &LeaderContext {
                key: call.key.clone(),
                lease_until_ms,
                cached,
            })
            .await?;

        Ok(FlightResult {
            value,
            meta: FlightMeta {
                outcome,
                lease_until_ms: Some(lease_until_ms),
                waited_ms: Some(0),
            },
        })
    }

    async fn lead_inner<F, Fut>(
        &self,
        phases: &PhaseRunner,
        call: &ResolvedCall,
        fetcher: F,
    ) -> Result<(Vec<u8>, bool), FlightError>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>> + Send,
    {
        let value = phases.fetch(fetcher(fetch_context(call))).await?;

        let cached = (call.should_cache)(&value);
        if cached {
            phases.cache_set(&self.cache, &value, call.cache_ttl_ms).await?;
        }

        // Even without a cache write, readiness lets followers stop waiting.
        phases.lease_mark_ready(&self.leases).await?;

        Ok((value, cached))
    }

    /// Follower path: bounded poll loop, one final probe, then classify.
    async fn follow<F, Fut>(
        &self,
        phases: &PhaseRunner,
        call: ResolvedCall,
        fetcher: F,
        lease_until_ms: u64,
    ) -> Result<FlightResult, FlightError>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, BoxedError>> + Send,
    {
        let start_ms = self.clock.now_unix_ms();
        let mut attempt: u32 = 0;
        let mut found: Option<Vec<u8>> = None;

        if call.wait_max_ms > 0 {
            loop {
                if let Some(value) = phases.cache_get(&self.cache).await? {
                    found = Some(value);
                    break;
                }

                if let Some(state) = phases.lease_is_ready(&self.leases).await? {
                    // Ready without a cached value means the leader declined
                    // to cache; expired means the lease died. Stop waiting
                    // either way.
                    if state.ready || state.expired {
                        break;
                    }
                }

                let elapsed_ms = self.clock.now_unix_ms().saturating_sub(start_ms);
                let remaining_ms = call.wait_max_ms.saturating_sub(elapsed_ms);
                if remaining_ms == 0 {
                    break;
                }

                let ctx = WaitContext {
                    attempt,
                    elapsed_ms,
                    remaining_ms,
                    wait_max_ms: call.wait_max_ms,
                    wait_step_ms: call.wait_step_ms,
                };
                let delay_ms = phases.strategy_delay(call.strategy.as_ref(), &ctx)?.min(remaining_ms);

                attempt = attempt.saturating_add(1);
                phases.sleep(&self.clock, delay_ms).await;
            }
        }

        // One more read covers the race between the last poll and the
        // leader's cache write.
        let value = match found {
            Some(value) => Some(value),
            None => phases.cache_get(&self.cache).await?,
        };
        let waited_ms = self.clock.now_unix_ms().saturating_sub(start_ms);

        match value {
            Some(value) => {
                debug!(key = %call.key, outcome = %Outcome::MissFollowerHit, waited_ms, "follower observed cached value");
                call.hooks
                    .follower_wait(&FollowerWaitContext {
                        key: call.key.clone(),
                        lease_until_ms,
                        waited_ms,
                        outcome: FollowerWaitOutcome::Hit,
                    })
                    .await?;
                Ok(FlightResult {
                    value,
                    meta: FlightMeta {
                        outcome: Outcome::MissFollowerHit,
                        lease_until_ms: Some(lease_until_ms),
                        waited_ms: Some(waited_ms),
                    },
                })
            }
            None => {
                debug!(key = %call.key, outcome = %Outcome::MissFollowerFallback, waited_ms, "follower wait exhausted");
                call.hooks
                    .follower_wait(&FollowerWaitContext {
                        key: call.key.clone(),
                        lease_until_ms,
                        waited_ms,
                        outcome: FollowerWaitOutcome::Fallback,
                    })
                    .await?;

                // Fallback fetch: no lease, no cache write, no readiness.
                let value = phases.fetch(fetcher(fetch_context(&call))).await?;

                call.hooks
                    .fallback(&value, &FallbackContext {
                        key: call.key.clone(),
                        lease_until_ms,
                        waited_ms,
                    })
                    .await?;

                Ok(FlightResult {
                    value,
                    meta: FlightMeta {
                        outcome: Outcome::MissFollowerFallback,
                        lease_until_ms: Some(lease_until_ms),
                        waited_ms: Some(waited_ms),
                    },
                })
            }
        }
    }
}

fn fetch_context(call: &ResolvedCall) -> FetchContext {
    FetchContext {
        cancel: call.cancel.as_ref().map(CancellationToken::child_token).unwrap_or_default(),
    }
}

/// Scoped lease ownership for the leader path.
///
/// Normal and error paths release explicitly (attempted exactly once). If
/// the flow future is dropped instead, cancellation being the one way that
/// happens, `Drop` spawns a detached best-effort release so the lease does
/// not linger until expiry.
struct LeaseGuard {
    leases: Arc<dyn Leases>,
    key: String,
    owner: String,
    released: bool,
}

impl LeaseGuard {
    fn new(leases: Arc<dyn Leases>, key: String, owner: String) -> Self {
        Self {
            leases,
            key,
            owner,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        release_best_effort(&self.leases, &self.key, &self.owner).await;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let leases = self.leases.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                release_best_effort(&leases, &key, &owner).await;
            });
        } else {
            warn!(key = %key, owner = %owner, "no runtime to release lease; expiry will clean up");
        }
    }
}

async fn release_best_effort(leases: &Arc<dyn Leases>, key: &str, owner: &str) {
    let span = adapter_phase_span(Phase::LeaseRelease, key, leases.name());
    if let Err(error) = leases.release(key, owner).instrument(span).await {
        warn!(key = %key, owner = %owner, %error, "lease release failed; expiry will clean up");
    }
}
