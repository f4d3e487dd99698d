//! adcrelay: watch capture directories and relay finished files over SFTP.
//!
//! ```text
//!  notify thread          event loop                  upload workers
//! ┌────────────┐  events ┌──────────────────┐  tasks ┌──────────────────┐
//! │ Directory  │────────▶│ CompletionDetector│──────▶│ semaphore-gated  │
//! │ Observer   │         │ + DispatchLedger  │       │ spawn_blocking   │
//! └────────────┘         └──────────────────┘        │ UploadClient     │
//!                                                     └──────────────────┘
//! ```

pub mod config;
pub mod credentials;
pub mod relay;
pub mod runtime;
pub mod signals;

pub use config::{ConfigError, RelayConfig};
pub use credentials::{resolve_shared, ConfigCredentials, CredentialSource};
pub use relay::{Relay, RelayError, RelayHandle, RelayReport, RelaySettings, RelayState};
pub use runtime::block_on_bounded;
pub use signals::{install_signal_handler, SignalAction, SignalLatch};
