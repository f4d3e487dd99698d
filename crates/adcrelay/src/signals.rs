//! SIGINT/SIGTERM (Ctrl+C on Windows) handling.
//!
//! The first signal asks for a graceful stop. Any later signal force-quits,
//! so a slow grace period can always be cut short.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit status for a forced quit (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// What to do with an incoming signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    ForceExit,
}

/// Counts signals received by this process.
#[derive(Debug, Clone, Default)]
pub struct SignalLatch {
    received: Arc<AtomicUsize>,
}

impl SignalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one signal.
    pub fn record(&self) -> SignalAction {
        if self.received.fetch_add(1, Ordering::SeqCst) == 0 {
            SignalAction::Shutdown
        } else {
            SignalAction::ForceExit
        }
    }
}

/// Call `on_shutdown` on the first signal; exit the process on the next.
pub fn install_signal_handler<F>(on_shutdown: F) -> Result<()>
where
    F: Fn() + Send + 'static,
{
    let latch = SignalLatch::new();
    let handle = move |name: &str| match latch.record() {
        SignalAction::Shutdown => {
            info!("Received {}, initiating shutdown (repeat to force quit)...", name);
            on_shutdown();
        }
        SignalAction::ForceExit => {
            warn!("Received {} again, exiting immediately", name);
            std::process::exit(FORCED_EXIT_CODE);
        }
    };

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
        std::thread::spawn(move || {
            for sig in signals.forever() {
                handle(&format!("signal {}", sig));
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || handle("Ctrl+C")).context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_shuts_down_and_later_ones_force_exit() {
        let latch = SignalLatch::new();
        assert_eq!(latch.record(), SignalAction::Shutdown);
        assert_eq!(latch.record(), SignalAction::ForceExit);
        assert_eq!(latch.record(), SignalAction::ForceExit);
    }

    #[test]
    fn clones_share_the_count() {
        let latch = SignalLatch::new();
        let from_handler = latch.clone();
        assert_eq!(from_handler.record(), SignalAction::Shutdown);
        assert_eq!(latch.record(), SignalAction::ForceExit);
    }
}
