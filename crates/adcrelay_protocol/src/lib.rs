//! Shared value types for the capture relay.
//!
//! Everything that crosses a crate boundary lives here:
//!
//! ```text
//! ┌─────────────┐  CreationEvent  ┌─────────────┐  TransferTask  ┌─────────────┐
//! │  Observer   │────────────────▶│  Detector   │───────────────▶│  Uploader   │
//! │  (notify)   │                 │ (N ⇒ N-1)   │                │ (ssh/sftp)  │
//! └─────────────┘                 └─────────────┘                └─────────────┘
//! ```
//!
//! - **CaptureFile**: `adc_data_Raw_<N>.bin` inside one run directory
//! - **CreationEvent**: raw "a path appeared" signal from the observer
//! - **TransferTask**: a file inferred complete and ready to ship
//! - **Credentials**: resolved remote identity, secret redacted from `Debug`

pub mod defaults;
pub mod idempotency;
pub mod types;

pub use idempotency::DispatchKey;
pub use types::{
    CaptureFile, CreationEvent, Credentials, RemoteEndpoint, Secret, TransferTask,
    CAPTURE_FILE_PREFIX, CAPTURE_FILE_SUFFIX,
};
