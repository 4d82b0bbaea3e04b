//! Log sinks and log directory pruning
//!
//! Every process writes to stdout and to its own `jasper_YYYYmmdd_HHMMSS.log`
//! file. A background task keeps the directory within the configured age and
//! size limits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::RuntimeConfig;
use crate::config::file::read_config;
use crate::shutdown::ShutdownFlag;
use crate::{Error, Result};

/// Time between pruning passes
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

const SECS_PER_DAY: u64 = 86_400;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// File name for a log started at `started`
#[must_use]
pub fn log_file_name(started: chrono::DateTime<chrono::Local>) -> String {
    format!("jasper_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Open this process's log file behind a background writer thread
///
/// Lines are flushed to disk until the returned guard is dropped.
///
/// # Errors
///
/// Returns error if the log directory or file cannot be created
pub fn file_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard, PathBuf)> {
    fs::create_dir_all(log_dir)?;
    let name = log_file_name(chrono::Local::now());

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&name)
        .build(log_dir)
        .map_err(|e| Error::Config(format!("failed to open log file: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    Ok((writer, guard, log_dir.join(name)))
}

/// Install the global subscriber with a stdout sink and a file sink
///
/// Returns the path of the file this process writes to and the guard that
/// keeps the file sink flushing. Hold the guard until exit.
///
/// # Errors
///
/// Returns error if the log directory or file cannot be created, or if a
/// global subscriber is already installed
pub fn init_tracing(log_dir: &Path, filter: &str) -> Result<(PathBuf, WorkerGuard)> {
    let (writer, guard, path) = file_writer(log_dir)?;

    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let stdout_layer = fmt::layer().with_filter(env_filter());
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))?;

    Ok((path, guard))
}

/// What one pruning pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Files removed for exceeding the retention age
    pub expired: usize,
    /// Files removed to get under the size cap
    pub evicted: usize,
    /// Bytes left in the directory afterwards
    pub remaining_bytes: u64,
}

struct LogFile {
    path: PathBuf,
    modified: SystemTime,
    len: u64,
}

/// Enforces age and total-size limits on a log directory
#[derive(Debug, Clone)]
pub struct LogRotator {
    dir: PathBuf,
    max_bytes: u64,
    retention: Duration,
    active: Option<PathBuf>,
}

impl LogRotator {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            retention,
            active: None,
        }
    }

    /// Limits taken from `log_max_size_mb` and `log_retention_days`
    pub fn from_config(dir: impl Into<PathBuf>, config: &RuntimeConfig) -> Self {
        Self::new(
            dir,
            config.log_max_size_mb.saturating_mul(BYTES_PER_MB),
            Duration::from_secs(config.log_retention_days.saturating_mul(SECS_PER_DAY)),
        )
    }

    /// Never delete `path`, the file this process is writing to
    #[must_use]
    pub fn with_active(mut self, path: impl Into<PathBuf>) -> Self {
        self.active = Some(path.into());
        self
    }

    /// Run one pruning pass against the current time
    ///
    /// # Errors
    ///
    /// Returns error if the log directory cannot be listed
    pub fn cleanup(&self) -> Result<PruneReport> {
        self.cleanup_at(SystemTime::now())
    }

    fn cleanup_at(&self, now: SystemTime) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        if !self.dir.exists() {
            return Ok(report);
        }

        let mut files = self.log_files()?;

        // Age pass
        files.retain(|file| {
            let age = now.duration_since(file.modified).unwrap_or_default();
            if age <= self.retention || self.is_active(&file.path) {
                return true;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    tracing::info!(path = %file.path.display(), "deleted old log file");
                    report.expired += 1;
                    false
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "failed to delete log file");
                    true
                }
            }
        });

        // Size pass, oldest first
        files.sort_by_key(|file| file.modified);
        let mut total: u64 = files.iter().map(|file| file.len).sum();

        for file in &files {
            if total <= self.max_bytes {
                break;
            }
            if self.is_active(&file.path) {
                continue;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    tracing::info!(
                        path = %file.path.display(),
                        bytes = file.len,
                        "deleted log file to enforce size limit"
                    );
                    total -= file.len;
                    report.evicted += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "failed to delete log file");
                }
            }
        }

        report.remaining_bytes = total;
        Ok(report)
    }

    fn is_active(&self, path: &Path) -> bool {
        self.active.as_deref() == Some(path)
    }

    fn log_files(&self) -> Result<Vec<LogFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "log") {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            files.push(LogFile {
                path,
                modified: metadata.modified()?,
                len: metadata.len(),
            });
        }
        Ok(files)
    }
}

/// Prune `log_dir` now and then hourly until shutdown
///
/// Each pass re-reads the config file for the current limits, independent of
/// the pipeline's snapshot.
pub fn spawn_pruning(
    log_dir: PathBuf,
    config_path: PathBuf,
    active: Option<PathBuf>,
    shutdown: ShutdownFlag,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if shutdown.is_triggered() {
                break;
            }

            let config = read_config(&config_path).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "log pruning using default limits");
                RuntimeConfig::default()
            });
            let mut rotator = LogRotator::from_config(&log_dir, &config);
            if let Some(path) = &active {
                rotator = rotator.with_active(path);
            }

            match tokio::task::spawn_blocking(move || rotator.cleanup()).await {
                Ok(Ok(report)) => tracing::debug!(?report, "log pruning pass complete"),
                Ok(Err(e)) => tracing::error!(error = %e, "log pruning failed"),
                Err(e) => tracing::error!(error = %e, "log pruning task panicked"),
            }
        }
    })
}
