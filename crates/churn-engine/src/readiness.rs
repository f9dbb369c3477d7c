// Bounded readiness polling for platforms that accept connections before they can serve.
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Poll `probe` until it succeeds or `max_attempts` are used up.
///
/// Returns `true` on the first success and `false` once attempts are
/// exhausted; it never errors. The caller decides whether `false` is fatal.
pub async fn wait_ready<F, Fut, E>(mut probe: F, max_attempts: u32, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(()) => {
                info!(attempt, "platform ready");
                return true;
            }
            Err(err) => {
                debug!(attempt, max_attempts, error = %err, "platform not ready");
                if attempt < max_attempts {
                    sleep(interval).await;
                }
            }
        }
    }
    warn!(max_attempts, "platform did not become ready");
    false
}
