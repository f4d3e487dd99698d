//! Logging setup shared by adcrelay binaries.
//!
//! Two sinks: a daily-rolled file under `$ADCRELAY_HOME/logs` (no ANSI,
//! written off-thread) and stderr. Both honor `RUST_LOG`.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "adcrelay=info,adcrelay_watch=info,adcrelay_upload=info";
const VERBOSE_LOG_FILTER: &str = "adcrelay=debug,adcrelay_watch=debug,adcrelay_upload=debug";
const KEEP_LOG_FILES: usize = 7;

/// Logging configuration for one process.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Raise console output to debug.
    pub verbose: bool,
    /// Override the log directory (defaults to [`logs_dir`]).
    pub log_dir: Option<PathBuf>,
}

/// Keeps the background log writer alive. Drop it last: pending lines are
/// flushed on drop.
pub struct LogGuard {
    _worker: WorkerGuard,
    dir: PathBuf,
}

impl LogGuard {
    /// Directory holding the rolled log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Install the global subscriber.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir(),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = file_appender(&dir, config.app_name)?;
    let (file_writer, worker) = tracing_appender::non_blocking(appender);

    let file_filter = env_filter_or(DEFAULT_LOG_FILTER);
    let console_filter = if config.verbose {
        env_filter_or(VERBOSE_LOG_FILTER)
    } else {
        env_filter_or(DEFAULT_LOG_FILTER)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(LogGuard {
        _worker: worker,
        dir,
    })
}

/// `<app>.<date>.log`, rolled daily, oldest files pruned.
fn file_appender(dir: &Path, app_name: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_prefix(app_name))
        .filename_suffix("log")
        .max_log_files(KEEP_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

fn env_filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// adcrelay home directory: `$ADCRELAY_HOME`, else `~/.adcrelay`.
pub fn adcrelay_home() -> PathBuf {
    if let Ok(path) = std::env::var("ADCRELAY_HOME") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".adcrelay")
}

/// Logs directory: `<home>/logs`
pub fn logs_dir() -> PathBuf {
    adcrelay_home().join("logs")
}

fn file_prefix(app_name: &str) -> String {
    let prefix = app_name
        .trim()
        .replace(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'), "_");
    if prefix.is_empty() {
        "adcrelay".to_string()
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn appender_writes_prefixed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut appender = file_appender(tmp.path(), "adc relay").unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("adc_relay."), "{:?}", names);
        assert!(names[0].ends_with(".log"), "{:?}", names);
    }

    #[test]
    fn non_blocking_writer_flushes_on_guard_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let appender = file_appender(tmp.path(), "relay").unwrap();
        let (mut writer, guard) = tracing_appender::non_blocking(appender);
        writer.write_all(b"queued line\n").unwrap();
        drop(guard);

        let entry = fs::read_dir(tmp.path()).unwrap().next().unwrap().unwrap();
        let contents = fs::read_to_string(entry.path()).unwrap();
        assert_eq!(contents, "queued line\n");
    }

    #[test]
    fn app_name_becomes_safe_prefix() {
        assert_eq!(file_prefix("adc relay/v1"), "adc_relay_v1");
        assert_eq!(file_prefix(""), "adcrelay");
    }
}
