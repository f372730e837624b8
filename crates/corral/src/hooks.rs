//! User callbacks fired at phase boundaries.
//!
//! [`FlightHooks`] is implemented by callers that want to observe hits,
//! leader completions, follower waits and fallbacks. All methods default to
//! no-ops so implementors override only what they care about.
//!
//! Hook failures are not swallowed: any error aborts the call as
//! `HOOK_FAILED`, tagged with the hook's phase. When both instance-level and
//! per-call hooks are configured, the instance hooks run first for each
//! event.

use std::sync::Arc;

use async_trait::async_trait;
use corral_core::BoxedError;
use corral_core::FlightError;
use corral_core::Phase;
use tracing::Instrument;

use crate::phase_runner::phase_span;

/// Context for [`FlightHooks::on_hit`].
#[derive(Debug, Clone)]
pub struct HitContext {
    /// Key that hit.
    pub key: String,
}

/// Context for [`FlightHooks::on_leader`].
#[derive(Debug, Clone)]
pub struct LeaderContext {
    /// Key that was fetched.
    pub key: String,
    /// Expiry of the lease this leader held.
    pub lease_until_ms: u64,
    /// Whether the value passed the cache-acceptance predicate and was
    /// written to the cache.
    pub cached: bool,
}

/// How a follower's wait concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerWaitOutcome {
    /// The cached value appeared while waiting.
    Hit,
    /// The wait budget ran out (or the lease died); the follower fetches.
    Fallback,
}

/// Context for [`FlightHooks::on_follower_wait`].
#[derive(Debug, Clone)]
pub struct FollowerWaitContext {
    /// Key being waited on.
    pub key: String,
    /// The leader's lease expiry as reported at acquire time.
    pub lease_until_ms: u64,
    /// Measured time spent in the wait loop.
    pub waited_ms: u64,
    /// How the wait concluded.
    pub outcome: FollowerWaitOutcome,
}

/// Context for [`FlightHooks::on_fallback`].
#[derive(Debug, Clone)]
pub struct FallbackContext {
    /// Key that was fetched by the follower.
    pub key: String,
    /// The leader's lease expiry as reported at acquire time.
    pub lease_until_ms: u64,
    /// Measured time spent waiting before falling back.
    pub waited_ms: u64,
}

/// Observer callbacks for `get_or_set` phase boundaries.
#[async_trait]
pub trait FlightHooks: Send + Sync {
    /// Fired after a cache hit, before the value is returned.
    async fn on_hit(&self, _value: &[u8], _ctx: &HitContext) -> Result<(), BoxedError> {
        Ok(())
    }

    /// Fired on the leader path after fetch, cache write and lease release.
    async fn on_leader(&self, _value: &[u8], _ctx: &LeaderContext) -> Result<(), BoxedError> {
        Ok(())
    }

    /// Fired exactly once when a follower's wait loop ends, before any
    /// fallback fetch.
    async fn on_follower_wait(&self, _ctx: &FollowerWaitContext) -> Result<(), BoxedError> {
        Ok(())
    }

    /// Fired after a follower's own fetch, before the value is returned.
    async fn on_fallback(&self, _value: &[u8], _ctx: &FallbackContext) -> Result<(), BoxedError> {
        Ok(())
    }
}

/// Sequences instance-level hooks before per-call hooks and maps failures.
pub(crate) struct HookRunner {
    instance: Option<Arc<dyn FlightHooks>>,
    call: Option<Arc<dyn FlightHooks>>,
}

impl HookRunner {
    pub(crate) fn new(instance: Option<Arc<dyn FlightHooks>>, call: Option<Arc<dyn FlightHooks>>) -> Self {
        Self { instance, call }
    }

    fn stack(&self) -> impl Iterator<Item = &Arc<dyn FlightHooks>> {
        [self.instance.as_ref(), self.call.as_ref()].into_iter().flatten()
    }

    fn tag(key: &str, phase: Phase, source: BoxedError) -> FlightError {
        let key = key.to_string();
        FlightError::wrap_user(source, |source| FlightError::Hook { key, phase, source })
    }

    pub(crate) async fn hit(&self, value: &[u8], ctx: &HitContext) -> Result<(), FlightError> {
        let span = phase_span(Phase::HookOnHit, &ctx.key);
        async {
            for hooks in self.stack() {
                hooks
                    .on_hit(value, ctx)
                    .await
                    .map_err(|source| Self::tag(&ctx.key, Phase::HookOnHit, source))?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub(crate) async fn leader(&self, value: &[u8], ctx: &LeaderContext) -> Result<(), FlightError> {
        let span = phase_span(Phase::HookOnLeader, &ctx.key);
        async {
            for hooks in self.stack() {
                hooks
                    .on_leader(value, ctx)
                    .await
                    .map_err(|source| Self::tag(&ctx.key, Phase::HookOnLeader, source))?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub(crate) async fn follower_wait(&self, ctx: &FollowerWaitContext) -> Result<(), FlightError> {
        let span = phase_span(Phase::HookOnFollowerWait, &ctx.key);
        async {
            for hooks in self.stack() {
                hooks
                    .on_follower_wait(ctx)
                    .await
                    .map_err(|source| Self::tag(&ctx.key, Phase::HookOnFollowerWait, source))?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub(crate) async fn fallback(&self, value: &[u8], ctx: &FallbackContext) -> Result<(), FlightError> {
        let span = phase_span(Phase::HookOnFallback, &ctx.key);
        async {
            for hooks in self.stack() {
                hooks
                    .on_fallback(value, ctx)
                    .await
                    .map_err(|source| Self::tag(&ctx.key, Phase::HookOnFallback, source))?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}
