//! Relay orchestrator
//!
//! Design principles:
//! - `Idle -> Running -> Stopped`, observable through the handle
//! - One event loop consumes observer events and runs the detector in arrival order
//! - Each transfer task runs in its own tokio task, gated by a semaphore,
//!   with the blocking upload on the blocking pool
//! - Graceful shutdown via shutdown channel, bounded by a grace period

use adcrelay_protocol::defaults::{DEFAULT_MAX_CONCURRENT_UPLOADS, DEFAULT_SHUTDOWN_GRACE_SECS};
use adcrelay_protocol::{CreationEvent, TransferTask};
use adcrelay_upload::{CancellationToken, UploadError, UploadReceipt, Uploader};
use adcrelay_watch::{
    CompletionDetector, Decision, DirectoryObserver, DispatchLedger, EventStream, WatchError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Running,
    Stopped,
}

/// Relay settings (plain data)
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub watch_root: PathBuf,
    /// Uploads allowed in flight at once (minimum 1)
    pub max_concurrent_uploads: usize,
    /// How long in-flight uploads get to finish after a stop request
    pub shutdown_grace: Duration,
    pub end_of_run_marker: Option<String>,
}

impl RelaySettings {
    pub fn new(watch_root: impl Into<PathBuf>) -> Self {
        Self {
            watch_root: watch_root.into(),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            end_of_run_marker: None,
        }
    }
}

/// Counters for one relay lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Transfer tasks handed to upload workers
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Queued or in flight when the relay stopped
    pub abandoned: usize,
    /// Files recorded in the dispatch ledger
    pub ledger_size: usize,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to start watching: {0}")]
    Startup(#[source] WatchError),

    #[error("Watching failed, relay stopped: {source}")]
    Observation {
        #[source]
        source: WatchError,
        report: RelayReport,
    },

    #[error("Relay task failed: {0}")]
    Join(#[from] JoinError),
}

/// Handle for controlling a running relay
pub struct RelayHandle {
    shutdown_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<RelayState>,
    ledger: DispatchLedger,
    join_handle: JoinHandle<Result<RelayReport, RelayError>>,
}

impl RelayHandle {
    pub fn state(&self) -> RelayState {
        *self.state_rx.borrow()
    }

    /// Files handed off so far. Readable while the relay runs.
    pub fn ledger(&self) -> &DispatchLedger {
        &self.ledger
    }

    /// Resolves once the relay has stopped, on request or on its own.
    pub async fn stopped(&mut self) {
        loop {
            let state = *self.state_rx.borrow_and_update();
            if state == RelayState::Stopped {
                return;
            }
            if self.state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Request graceful shutdown and wait for the final report.
    pub async fn shutdown(self) -> Result<RelayReport, RelayError> {
        // Fails only if the loop already exited.
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle.await?
    }
}

/// Relay before it starts (`Idle`).
pub struct Relay<U: Uploader> {
    settings: RelaySettings,
    uploader: Arc<U>,
    ledger: DispatchLedger,
    state_tx: watch::Sender<RelayState>,
}

impl<U: Uploader> Relay<U> {
    pub fn new(settings: RelaySettings, uploader: U) -> Self {
        let (state_tx, _) = watch::channel(RelayState::Idle);
        Self {
            settings,
            uploader: Arc::new(uploader),
            ledger: DispatchLedger::new(),
            state_tx,
        }
    }

    /// Share an existing ledger (e.g. to inspect it from elsewhere).
    pub fn with_ledger(mut self, ledger: DispatchLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn state(&self) -> RelayState {
        *self.state_tx.borrow()
    }

    /// Subscribe to the watch root and start the event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<RelayHandle, RelayError> {
        let (observer, events) =
            DirectoryObserver::start(&self.settings.watch_root).map_err(RelayError::Startup)?;
        Ok(self.launch(Some(observer), events))
    }

    /// Start the event loop on an externally fed event stream.
    pub fn start_with_events(self, events: EventStream) -> RelayHandle {
        self.launch(None, events)
    }

    fn launch(self, observer: Option<DirectoryObserver>, events: EventStream) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let state_rx = self.state_tx.subscribe();

        let mut detector = CompletionDetector::with_ledger(self.ledger.clone());
        if let Some(marker) = &self.settings.end_of_run_marker {
            detector = detector.with_end_of_run_marker(marker.clone());
        }
        let permits = self.settings.max_concurrent_uploads.max(1);

        let event_loop = EventLoop {
            settings: self.settings,
            uploader: self.uploader,
            detector,
            observer,
            events,
            shutdown_rx,
            state_tx: self.state_tx,
            uploads: JoinSet::new(),
            permits: Arc::new(Semaphore::new(permits)),
            cancel: CancellationToken::new(),
            report: RelayReport::default(),
        };
        event_loop.state_tx.send_replace(RelayState::Running);

        RelayHandle {
            shutdown_tx,
            state_rx,
            ledger: self.ledger,
            join_handle: tokio::spawn(event_loop.run()),
        }
    }
}

enum UploadOutcome {
    Succeeded(UploadReceipt),
    Failed(UploadError),
    Abandoned,
    Panicked(String),
}

struct EventLoop<U: Uploader> {
    settings: RelaySettings,
    uploader: Arc<U>,
    detector: CompletionDetector,
    observer: Option<DirectoryObserver>,
    events: EventStream,
    shutdown_rx: mpsc::Receiver<()>,
    state_tx: watch::Sender<RelayState>,
    uploads: JoinSet<(TransferTask, UploadOutcome)>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    report: RelayReport,
}

impl<U: Uploader> EventLoop<U> {
    /// Main event loop - consumes self (can only be called once)
    async fn run(mut self) -> Result<RelayReport, RelayError> {
        info!(
            root = %self.settings.watch_root.display(),
            max_concurrent_uploads = self.settings.max_concurrent_uploads,
            "Relay running"
        );

        let failure = loop {
            tokio::select! {
                biased;

                // Shutdown request (or every handle dropped)
                _ = self.shutdown_rx.recv() => {
                    info!(in_flight = self.uploads.len(), "Shutdown requested");
                    break None;
                }

                Some(joined) = self.uploads.join_next(), if !self.uploads.is_empty() => {
                    self.record(joined);
                }

                event = self.events.next() => match event {
                    Some(Ok(event)) => self.on_event(&event),
                    Some(Err(e)) => {
                        error!(error = %e, "Observation failed, stopping relay");
                        break Some(e);
                    }
                    None => {
                        error!("Event stream closed unexpectedly, stopping relay");
                        break Some(WatchError::ChannelClosed);
                    }
                },
            }
        };

        self.wind_down().await;
        self.report.ledger_size = self.detector.ledger().len();
        self.state_tx.send_replace(RelayState::Stopped);

        let report = self.report.clone();
        info!(
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            failed = report.failed,
            abandoned = report.abandoned,
            ledger_size = report.ledger_size,
            "Relay stopped"
        );

        match failure {
            None => Ok(report),
            Some(source) => Err(RelayError::Observation { source, report }),
        }
    }

    fn on_event(&mut self, event: &CreationEvent) {
        match self.detector.observe(event) {
            Decision::Dispatch(task) => self.dispatch(task),
            other => trace!(path = %event.path.display(), decision = ?other, "No upload"),
        }
    }

    /// Hand a task to a new upload worker. Never waits: the worker queues on
    /// the semaphore itself.
    fn dispatch(&mut self, task: TransferTask) {
        self.report.dispatched += 1;
        info!(
            local = %task.local_path.display(),
            remote_dir = %task.remote_directory_name,
            in_flight = self.uploads.len(),
            "Dispatching upload"
        );

        let permits = Arc::clone(&self.permits);
        let uploader = Arc::clone(&self.uploader);
        let cancel = self.cancel.clone();

        self.uploads.spawn(async move {
            // Closed semaphore means the relay is stopping.
            let Ok(_permit) = permits.acquire_owned().await else {
                return (task, UploadOutcome::Abandoned);
            };
            if cancel.is_cancelled() {
                return (task, UploadOutcome::Abandoned);
            }

            let job = task.clone();
            let joined =
                tokio::task::spawn_blocking(move || uploader.upload(&job, &cancel)).await;
            let outcome = match joined {
                Ok(Ok(receipt)) => UploadOutcome::Succeeded(receipt),
                Ok(Err(UploadError::Cancelled)) => UploadOutcome::Abandoned,
                Ok(Err(e)) => UploadOutcome::Failed(e),
                Err(e) => UploadOutcome::Panicked(e.to_string()),
            };
            (task, outcome)
        });
    }

    fn record(&mut self, joined: Result<(TransferTask, UploadOutcome), JoinError>) {
        let (task, outcome) = match joined {
            Ok(done) => done,
            Err(e) if e.is_cancelled() => {
                self.report.abandoned += 1;
                return;
            }
            Err(e) => {
                error!(error = %e, "Upload worker panicked");
                self.report.failed += 1;
                return;
            }
        };

        match outcome {
            UploadOutcome::Succeeded(receipt) => {
                self.report.succeeded += 1;
                debug!(local = %task.local_path.display(), remote = %receipt.remote_path, "Upload recorded");
            }
            UploadOutcome::Failed(e) => {
                self.report.failed += 1;
                error!(
                    local = %task.local_path.display(),
                    kind = e.kind(),
                    error = %e,
                    "Upload failed, file dropped"
                );
            }
            UploadOutcome::Abandoned => {
                self.report.abandoned += 1;
                warn!(local = %task.local_path.display(), "Upload abandoned on shutdown");
            }
            UploadOutcome::Panicked(message) => {
                self.report.failed += 1;
                error!(local = %task.local_path.display(), error = %message, "Upload panicked");
            }
        }
    }

    /// Stop the subscription, release queued uploads, ask in-flight ones to
    /// stop and wait for them up to the grace period.
    async fn wind_down(&mut self) {
        if let Some(mut observer) = self.observer.take() {
            observer.stop();
        }
        self.permits.close();
        self.cancel.cancel();

        if self.uploads.is_empty() {
            return;
        }
        let grace = self.settings.shutdown_grace;
        info!(
            pending = self.uploads.len(),
            grace_ms = grace.as_millis() as u64,
            "Waiting for uploads to finish"
        );

        if tokio::time::timeout(grace, self.drain()).await.is_err() {
            warn!(
                remaining = self.uploads.len(),
                "Grace period elapsed, abandoning remaining uploads"
            );
            self.uploads.abort_all();
            self.drain().await;
        }
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.uploads.join_next().await {
            self.record(joined);
        }
    }
}
