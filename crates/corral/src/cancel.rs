//! Cancellation bridging for `get_or_set`.
//!
//! An already-cancelled token fails the call before any I/O. Otherwise the
//! whole flow is raced against the cancellation event; the first to complete
//! wins. Cancellation surfaces as `ABORTED` with phase `abort`. A leader's
//! lease is still released when the flow future is dropped mid-flight (the
//! lease guard's drop path spawns a best-effort release).

use std::future::Future;

use corral_core::FlightError;
use corral_core::FlightResult;
use corral_core::Phase;
use corral_core::error::AbortedSnafu;
use tokio_util::sync::CancellationToken;

/// Race `flow` against `cancel`, when a token was provided.
pub(crate) async fn race_with_cancel<F>(
    key: &str,
    cancel: Option<CancellationToken>,
    flow: F,
) -> Result<FlightResult, FlightError>
where
    F: Future<Output = Result<FlightResult, FlightError>>,
{
    let Some(token) = cancel else {
        return flow.await;
    };

    if token.is_cancelled() {
        return AbortedSnafu {
            key,
            phase: Phase::Abort,
        }
        .fail();
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => AbortedSnafu {
            key,
            phase: Phase::Abort,
        }
        .fail(),
        result = flow => result,
    }
}
