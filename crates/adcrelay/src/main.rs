//! adcrelay launcher
//!
//! - `watch`: run the relay until SIGINT/SIGTERM (Ctrl+C on Windows)
//! - `push`: upload files once, e.g. the last capture of a run
//! - `check-config`: validate configuration and print a redacted summary

use adcrelay::{
    block_on_bounded, install_signal_handler, resolve_shared, ConfigCredentials, Relay,
    RelayConfig, RelayError, RelaySettings,
};
use adcrelay_logging::{init_logging, LogConfig};
use adcrelay_protocol::{Credentials, TransferTask};
use adcrelay_upload::{CancellationToken, SshConnector, UploadClient, Uploader};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "adcrelay", version, about = "Relay finished capture files to a remote host over SFTP")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a directory tree and upload each capture file once its successor appears
    Watch {
        /// Config file (TOML)
        #[arg(short, long, env = "ADCRELAY_CONFIG")]
        config: PathBuf,

        /// Directory to watch (overrides `watch_root`)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Upload the given files once, using the same remote layout
    Push {
        #[arg(short, long, env = "ADCRELAY_CONFIG")]
        config: PathBuf,

        /// Local files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Validate configuration and print it with secrets redacted
    CheckConfig {
        #[arg(short, long, env = "ADCRELAY_CONFIG")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Held until exit so queued file log lines are flushed.
    let _log_guard = match init_logging(LogConfig {
        app_name: "adcrelay",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        Ok(guard) => {
            tracing::debug!(log_dir = %guard.dir().display(), "Logging initialized");
            Some(guard)
        }
        Err(e) => {
            eprintln!("Warning: file logging disabled: {:#}", e);
            None
        }
    };

    let result = match cli.command {
        Commands::Watch { config, root } => run_watch(config, root),
        Commands::Push { config, files } => run_push(config, files),
        Commands::CheckConfig { config } => run_check_config(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> Result<(RelayConfig, Arc<Credentials>)> {
    let config = RelayConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let credentials = resolve_shared(&ConfigCredentials::new(&config.remote))
        .context("Failed to resolve remote credentials")?;
    Ok((config, credentials))
}

fn upload_client(config: &RelayConfig, credentials: Arc<Credentials>) -> UploadClient<SshConnector> {
    UploadClient::new(
        SshConnector::new(config.connect_timeout()),
        credentials,
        config.upload_options(),
    )
}

fn run_watch(config_path: PathBuf, root: Option<PathBuf>) -> Result<()> {
    let (config, credentials) = load_config(&config_path)?;
    let Some(watch_root) = root.or_else(|| config.watch_root.clone()) else {
        bail!("No watch root: pass --root or set watch_root in the config");
    };

    info!(
        root = %watch_root.display(),
        remote = %credentials.endpoint,
        user = %credentials.username,
        auth = credentials.secret.kind(),
        remote_root = %config.remote.remote_root,
        "Starting adcrelay"
    );

    let settings = RelaySettings {
        watch_root,
        max_concurrent_uploads: config.uploads.max_concurrent,
        shutdown_grace: config.shutdown_grace(),
        end_of_run_marker: config.end_of_run_marker.clone(),
    };
    let uploader = upload_client(&config, credentials);
    let grace = settings.shutdown_grace;

    block_on_bounded(grace, watch_until_stopped(settings, uploader))?
}

async fn watch_until_stopped<U: Uploader>(settings: RelaySettings, uploader: U) -> Result<()> {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<()>();
    install_signal_handler(move || {
        let _ = signal_tx.send(());
    })?;

    let mut handle = Relay::new(settings, uploader).start()?;

    tokio::select! {
        _ = signal_rx.recv() => {}
        _ = handle.stopped() => {}
    }

    match handle.shutdown().await {
        Ok(report) => {
            info!(
                dispatched = report.dispatched,
                succeeded = report.succeeded,
                failed = report.failed,
                abandoned = report.abandoned,
                "Shutdown complete"
            );
            Ok(())
        }
        Err(RelayError::Observation { source, report }) => {
            warn!(
                dispatched = report.dispatched,
                succeeded = report.succeeded,
                abandoned = report.abandoned,
                "Relay stopped after observation failure"
            );
            Err(anyhow::Error::new(source).context("Watching failed"))
        }
        Err(e) => Err(e.into()),
    }
}

fn run_push(config_path: PathBuf, files: Vec<PathBuf>) -> Result<()> {
    let (config, credentials) = load_config(&config_path)?;
    let client = upload_client(&config, credentials);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        install_signal_handler(move || cancel.cancel())?;
    }

    let mut uploaded = 0usize;
    for file in &files {
        let Some(task) = TransferTask::for_local_file(file) else {
            error!(path = %file.display(), "Path has no parent directory name, skipping");
            continue;
        };
        match client.upload(&task, &cancel) {
            Ok(receipt) => {
                println!("{} -> {}", file.display(), receipt.remote_path);
                uploaded += 1;
            }
            Err(e) => error!(path = %file.display(), kind = e.kind(), error = %e, "Upload failed"),
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    if uploaded < files.len() {
        bail!("{} of {} file(s) not uploaded", files.len() - uploaded, files.len());
    }
    Ok(())
}

fn run_check_config(config_path: PathBuf) -> Result<()> {
    let (config, credentials) = load_config(&config_path)?;

    println!("Config:        {}", config_path.display());
    match &config.watch_root {
        Some(root) => println!("Watch root:    {}", root.display()),
        None => println!("Watch root:    (pass --root)"),
    }
    println!("Remote:        {}@{}", credentials.username, credentials.endpoint);
    println!("Auth:          {} (redacted)", credentials.secret.kind());
    println!("Remote root:   {}", config.remote.remote_root);
    println!(
        "Uploads:       max_concurrent={} max_attempts={} atomic_rename={}",
        config.uploads.max_concurrent, config.uploads.max_attempts, config.uploads.atomic_rename
    );
    println!("Shutdown:      {}s grace", config.shutdown_grace_secs);
    if let Some(marker) = &config.end_of_run_marker {
        println!("End-of-run:    {}", marker);
    }
    Ok(())
}
