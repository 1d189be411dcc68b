//! Log sinks for the daemon
//!
//! Two fmt layers share one level filter: human-readable output on stderr and
//! an append-only daily file `whatip-(YYYY-MM-DD).log` under the configured
//! log directory. The file rolls over at local midnight on the next write.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Parse a `WHATIP_LOG_LEVEL` value
pub fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber
///
/// Fails if the log directory or today's file cannot be opened.
pub fn init(level: Level, log_dir: &Path) -> Result<()> {
    let daily = DailyLogFile::open(log_dir)?;

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(daily))
        .try_init()
        .context("Failed to set tracing subscriber")
}

struct ActiveFile {
    date: NaiveDate,
    file: File,
}

/// Date-stamped append-only log file
pub struct DailyLogFile {
    dir: PathBuf,
    active: Mutex<ActiveFile>,
}

impl DailyLogFile {
    /// Open today's file, creating `dir` if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let date = Local::now().date_naive();
        let file = open_for(&dir, date)
            .with_context(|| format!("Failed to open {}", file_path(&dir, date).display()))?;

        Ok(Self {
            dir,
            active: Mutex::new(ActiveFile { date, file }),
        })
    }

    /// Path of the file receiving lines written on `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        file_path(&self.dir, date)
    }
}

fn file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("whatip-({}).log", date.format("%Y-%m-%d")))
}

fn open_for(dir: &Path, date: NaiveDate) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path(dir, date))
}

/// Writer handed out per event by [`DailyLogFile`]
pub struct DailyLogWriter<'a> {
    log: &'a DailyLogFile,
}

impl Write for DailyLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut active = self
            .log
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let today = Local::now().date_naive();
        if active.date != today {
            active.file = open_for(&self.log.dir, today)?;
            active.date = today;
        }

        active.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for DailyLogFile {
    type Writer = DailyLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        DailyLogWriter { log: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("warn"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_lines_land_in_dated_file() {
        let dir = TempDir::new().unwrap();
        let log = DailyLogFile::open(dir.path().join("logs")).unwrap();

        log.make_writer().write_all(b"first line\n").unwrap();
        log.make_writer().write_all(b"second line\n").unwrap();

        let path = log.path_for(Local::now().date_naive());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("whatip-(") && name.ends_with(").log"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "first line\nsecond line\n"
        );
    }

    #[test]
    fn test_existing_file_is_appended() {
        let dir = TempDir::new().unwrap();
        let today = Local::now().date_naive();
        fs::write(file_path(dir.path(), today), "earlier\n").unwrap();

        let log = DailyLogFile::open(dir.path()).unwrap();
        log.make_writer().write_all(b"later\n").unwrap();

        assert_eq!(
            fs::read_to_string(file_path(dir.path(), today)).unwrap(),
            "earlier\nlater\n"
        );
    }

    #[test]
    fn test_unopenable_directory_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        assert!(DailyLogFile::open(blocker.join("logs")).is_err());
    }
}
