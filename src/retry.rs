//! Bounded-attempt retry driver

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{EngineError, Result};

/// Run `body` up to `attempts` times, sleeping `delay` between attempts.
///
/// After each failure the driver waits, then consults
/// `condition(tries_left, last_error)`; a `false` verdict stops the loop
/// early. The last error is surfaced to the caller either way. The condition
/// is a plain predicate rather than an exception filter so callers can gate
/// retries on engine state (e.g. "still reconnecting").
pub async fn retry<T, C, F, Fut>(
    attempts: usize,
    delay: Duration,
    mut condition: C,
    mut body: F,
) -> Result<T>
where
    C: FnMut(usize, &EngineError) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    debug_assert!(attempts >= 1, "retry requires at least one attempt");

    let mut tries_left = attempts;
    loop {
        tries_left = tries_left.saturating_sub(1);

        match body().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if tries_left == 0 {
                    return Err(err);
                }

                tokio::time::sleep(delay).await;

                if !condition(tries_left, &err) {
                    debug!("retry stopped early with {} tries left: {}", tries_left, err);
                    return Err(err);
                }

                debug!("retrying after error ({} tries left): {}", tries_left, err);
            }
        }
    }
}
