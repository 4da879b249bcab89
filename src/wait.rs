//! The one suspension primitive behind element lookup, visibility waits and
//! the paused state.

use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Re-run `probe` every `interval` until it yields a value.
///
/// Returns `Ok(None)` once `timeout` has elapsed without a value; with no
/// timeout it polls until the probe succeeds or fails. The probe always runs
/// at least once and runs one final time at the deadline. Probe errors end
/// the wait immediately.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Option<Duration>,
    mut probe: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::time::sleep(pause).await;
    }
}
