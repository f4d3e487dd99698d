//! Process-level runtime ownership.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Drive `future` to completion on a fresh multi-threaded runtime, then shut
/// the runtime down without waiting longer than `grace` for blocking workers
/// that ignored cancellation.
pub fn block_on_bounded<F>(grace: Duration, future: F) -> Result<F::Output>
where
    F: Future,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("adcrelay")
        .build()
        .context("Failed to build tokio runtime")?;

    let output = runtime.block_on(future);
    debug!(grace_ms = grace.as_millis() as u64, "Shutting down runtime");
    runtime.shutdown_timeout(grace);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stuck_blocking_worker_does_not_hold_exit() {
        let started = Instant::now();
        let value = block_on_bounded(Duration::from_millis(100), async {
            // Detached, like an abandoned upload that never checks its token.
            drop(tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_secs(4));
            }));
            7
        })
        .unwrap();

        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn returns_future_output() {
        let out = block_on_bounded(Duration::from_secs(1), async { "done" }).unwrap();
        assert_eq!(out, "done");
    }
}
