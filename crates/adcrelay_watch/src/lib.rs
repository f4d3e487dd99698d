//! Watch a capture root and decide when files are complete.
//!
//! The producer never closes files in a way we can see, so completion is
//! inferred: when `adc_data_Raw_<N>.bin` appears, `adc_data_Raw_<N-1>.bin` is
//! assumed finished. This only holds while the producer writes strictly in
//! sequence and never reopens an earlier index.
//!
//! - [`DirectoryObserver`]: recursive `notify` subscription, forwards file creations
//! - [`CompletionDetector`]: maps a creation to at most one [`TransferTask`]
//! - [`DispatchLedger`]: the set of files already handed off
//!
//! [`TransferTask`]: adcrelay_protocol::TransferTask

pub mod detector;
pub mod error;
pub mod ledger;
pub mod observer;

pub use detector::{CompletionDetector, Decision};
pub use error::{Result, WatchError};
pub use ledger::DispatchLedger;
pub use observer::{DirectoryObserver, EventStream};
