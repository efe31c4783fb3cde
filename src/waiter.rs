//! Condition waiter.
//!
//! Polls the transport snapshot until a predicate holds, the timeout expires, or the run is
//! cancelled. The predicate is always evaluated at least once before the deadline is
//! checked, so a condition that already holds returns immediately even with a zero timeout.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelSignal;
use crate::error::{BatchError, BatchResult};
use crate::process::ProcessSnapshot;
use crate::transport::ProcessTransport;

/// Wait until `predicate` holds on the transport snapshot.
///
/// Returns how long the wait took. Fails with [`BatchError::ConditionTimeout`] once
/// `timeout` has elapsed without the predicate holding, or [`BatchError::Cancelled`] as soon
/// as `cancel` fires. The last poll lands exactly on the deadline, never past it.
#[instrument(skip(transport, predicate, cancel), fields(timeout_ms = timeout.as_millis() as u64))]
pub async fn wait_until<P>(
    transport: &dyn ProcessTransport,
    condition: &'static str,
    predicate: P,
    timeout: Duration,
    poll: Duration,
    cancel: &CancelSignal,
) -> BatchResult<Duration>
where
    P: Fn(&ProcessSnapshot) -> bool,
{
    let start = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        let elapsed = start.elapsed();
        if predicate(&transport.snapshot()) {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "Condition met");
            return Ok(elapsed);
        }
        if elapsed >= timeout {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "Condition timed out");
            return Err(BatchError::ConditionTimeout { condition, elapsed });
        }

        let pause = poll.min(timeout - elapsed);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = cancel.cancelled() => return Err(BatchError::Cancelled),
        }
    }
}
