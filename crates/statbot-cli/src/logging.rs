//! Daily log files under `<data_dir>/logs` plus stderr output

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "statbot";
const LOG_SUFFIX: &str = "log";

pub struct LogManager {
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    fn is_log_file(path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| {
                    name.starts_with(LOG_PREFIX) && name.ends_with(&format!(".{}", LOG_SUFFIX))
                })
    }

    /// Newest first. A missing directory has no files.
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        if !self.log_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.log_dir)
            .with_context(|| format!("reading {}", self.log_dir.display()))?
        {
            let path = entry?.path();
            if Self::is_log_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        files.reverse();
        Ok(files)
    }

    pub fn latest_log(&self) -> Result<Option<PathBuf>> {
        Ok(self.log_files()?.into_iter().next())
    }

    pub fn total_size(&self) -> Result<u64> {
        Ok(self
            .log_files()?
            .iter()
            .filter_map(|file| fs::metadata(file).ok())
            .map(|meta| meta.len())
            .sum())
    }

    /// Deletes log files last modified more than `days` ago; returns how many.
    pub fn cleanup_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        let mut deleted = 0;
        for path in self.log_files()? {
            let modified = fs::metadata(&path)?.modified()?;
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => eprintln!("Failed to delete old log {}: {}", path.display(), e),
            }
        }
        Ok(deleted)
    }

    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        match bytes {
            b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
            b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
            b => format!("{} B", b),
        }
    }
}

/// Last `count` lines of `path`.
pub fn tail_lines(path: &Path, count: usize) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    Ok(lines[start..].iter().map(|line| line.to_string()).collect())
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Keeps the non-blocking file writer alive; drop it last.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path, log_level: &str) -> Result<LoggingGuard> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let deleted = LogManager::new(log_dir.to_path_buf()).cleanup_older_than(LOG_RETENTION_DAYS)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .build(log_dir)
        .context("creating rolling log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_filter(env_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }
    Ok(LoggingGuard { _guard: guard })
}
