//! Eventual consistency helpers for timing-dependent tests.
//!
//! Lifecycle work runs on spawned tasks, so effects of a client message show
//! up some time after the call returns. These helpers poll with exponential
//! backoff instead of sleeping a fixed amount.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const INITIAL_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_millis(100);

/// Assert that a condition becomes true within `timeout`.
///
/// Uses exponential backoff from 5ms, capped at 100ms. Works with paused
/// tokio time since sleeping auto-advances the clock.
///
/// # Errors
///
/// Returns a description of the timeout when the condition never held.
pub async fn assert_eventually<F, Fut>(timeout: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "condition not met after {attempts} attempts in {:?}",
                elapsed
            ));
        }

        sleep(delay.min(timeout.saturating_sub(elapsed))).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_once_condition_holds() {
        let polls = AtomicU32::new(0);
        let result = assert_eventually(Duration::from_secs(1), || async {
            polls.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let result = assert_eventually(Duration::from_millis(50), || async { false }).await;
        assert!(result.unwrap_err().contains("condition not met"));
    }
}
