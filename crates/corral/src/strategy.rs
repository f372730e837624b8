//! Inter-poll delay strategies for the follower wait loop.
//!
//! A strategy is consulted once per loop iteration and computes the next
//! delay from the attempt counter and the remaining budget. The arithmetic
//! lives in pure functions so it can be tested with explicit inputs; the
//! [`WaitStrategy`] implementations only add parameter handling and jitter
//! sampling.
//!
//! All functions are total: saturating arithmetic, no panics, and every
//! result is clamped to the remaining wait budget by the caller.

use corral_core::BoxedError;
use rand::Rng;

/// Inputs available to a wait strategy on each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitContext {
    /// Zero-based iteration counter.
    pub attempt: u32,
    /// Time spent in the wait loop so far, in milliseconds.
    pub elapsed_ms: u64,
    /// Remaining wait budget in milliseconds (always > 0 when consulted).
    pub remaining_ms: u64,
    /// Total wait budget in milliseconds.
    pub wait_max_ms: u64,
    /// Configured base step in milliseconds.
    pub wait_step_ms: u64,
}

/// Computes the next inter-poll delay.
///
/// Must return a non-negative, finite delay in milliseconds. A returned
/// error aborts the call as `WAIT_STRATEGY_FAILED`; the runtime never
/// retries the strategy.
pub trait WaitStrategy: Send + Sync {
    /// Compute the delay before the next poll.
    fn next_delay_ms(&self, ctx: &WaitContext) -> Result<u64, BoxedError>;
}

/// Polls at a fixed interval: every delay is the configured wait step.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay;

impl WaitStrategy for FixedDelay {
    fn next_delay_ms(&self, ctx: &WaitContext) -> Result<u64, BoxedError> {
        Ok(ctx.wait_step_ms)
    }
}

/// Exponential backoff with proportional jitter.
///
/// `delay = min(initial * multiplier^attempt, max_delay) ± jitter * delay`,
/// clamped to the remaining budget.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Base delay for attempt 0. `None` uses the call's wait step.
    pub initial_ms: Option<u64>,
    /// Growth factor per attempt. Must be finite and >= 1.
    pub multiplier: f64,
    /// Upper cap on the un-jittered delay.
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1]`: the delay is perturbed by up to this
    /// fraction of itself in either direction.
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_ms: None,
            multiplier: 2.0,
            max_delay_ms: 5_000,
            jitter: 0.1,
        }
    }
}

impl WaitStrategy for ExponentialBackoff {
    fn next_delay_ms(&self, ctx: &WaitContext) -> Result<u64, BoxedError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("backoff multiplier must be finite and >= 1, got {}", self.multiplier).into());
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("backoff jitter must be in [0, 1], got {}", self.jitter).into());
        }

        let initial_ms = self.initial_ms.unwrap_or(ctx.wait_step_ms);
        let base_ms = compute_backoff_delay_ms(ctx.attempt, initial_ms, self.multiplier, self.max_delay_ms);
        let unit: f64 = rand::rng().random_range(0.0..1.0);
        let jittered_ms = apply_jitter_ms(base_ms, self.jitter, unit);
        Ok(clamp_delay_ms(jittered_ms, ctx.remaining_ms))
    }
}

// ============================================================================
// Pure computation
// ============================================================================

/// Un-jittered exponential delay: `min(initial * multiplier^attempt, cap)`.
///
/// Overflow-safe: any non-finite or out-of-range intermediate saturates at
/// the cap.
#[inline]
pub fn compute_backoff_delay_ms(attempt: u32, initial_ms: u64, multiplier: f64, max_delay_ms: u64) -> u64 {
    let scaled = (initial_ms as f64) * multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    if !scaled.is_finite() || scaled >= max_delay_ms as f64 {
        return max_delay_ms;
    }
    scaled as u64
}

/// Perturb a delay by `±jitter * delay`, driven by a uniform sample
/// `unit` in `[0, 1)`. The result never goes below zero.
#[inline]
pub fn apply_jitter_ms(delay_ms: u64, jitter: f64, unit: f64) -> u64 {
    let offset = (unit * 2.0 - 1.0) * jitter * delay_ms as f64;
    let perturbed = delay_ms as f64 + offset;
    if !perturbed.is_finite() || perturbed <= 0.0 {
        return 0;
    }
    perturbed as u64
}

/// Clamp a delay to the remaining wait budget.
#[inline]
pub fn clamp_delay_ms(delay_ms: u64, remaining_ms: u64) -> u64 {
    delay_ms.min(remaining_ms)
}

// ============================================================================
// Tests
// ============================================================================
