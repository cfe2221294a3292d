use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDate};
use tracing::{debug, error, warn};

use crate::error::LogWriteError;


/// ISO-8601 local time with microseconds, e.g. `2025-07-20T14:03:11.123456`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateReading {
    pub timestamp: DateTime<Local>,
    pub bpm: u16,
}

impl HeartRateReading {
    pub fn new(timestamp: DateTime<Local>, bpm: u16) -> Self {
        Self { timestamp, bpm }
    }

    pub fn now(bpm: u16) -> Self {
        Self::new(Local::now(), bpm)
    }

    fn csv_line(&self) -> String {
        format!("{},{}\n", self.timestamp.format(TIMESTAMP_FORMAT), self.bpm)
    }
}

pub type ReadingCallback = Box<dyn Fn(u16) + Send + Sync>;

/// Append-only per-day CSV files: `<dir>/hr_log_<YYYY-MM-DD>.csv`.
///
/// The file for the current day stays open between appends and is swapped
/// when a reading carries a new date.
#[derive(Debug)]
pub struct DailyLog {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl DailyLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("hr_log_{}.csv", date.format("%Y-%m-%d")))
    }

    /// A failed write closes the day's file; the next append opens it again.
    pub fn append(&self, reading: &HeartRateReading) -> Result<(), LogWriteError> {
        let date = reading.timestamp.date_naive();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        let mut file = match current.take() {
            Some((day, file)) if day == date => file,
            _ => self.open(date)?,
        };
        file.write_all(reading.csv_line().as_bytes())?;
        *current = Some((date, file));
        debug!(bpm = reading.bpm, "Reading logged");
        Ok(())
    }

    fn open(&self, date: NaiveDate) -> Result<File, LogWriteError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(date);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Opened daily log");
        Ok(file)
    }
}

/// Fans each decoded reading out to the application callback and the daily log.
///
/// Neither side can fail the caller: a panicking callback and an I/O error are
/// both logged and swallowed.
#[derive(Default)]
pub struct ReadingSink {
    callback: Option<ReadingCallback>,
    log: Option<DailyLog>,
}

impl ReadingSink {
    pub fn new(callback: Option<ReadingCallback>, log: Option<DailyLog>) -> Self {
        Self { callback, log }
    }

    pub fn with_callback(callback: impl Fn(u16) + Send + Sync + 'static) -> Self {
        Self::new(Some(Box::new(callback)), None)
    }

    pub fn logging_to(mut self, log: DailyLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn on_reading(&self, reading: &HeartRateReading) {
        if let Some(callback) = &self.callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(reading.bpm))).is_err() {
                error!(bpm = reading.bpm, "Heart rate callback panicked");
            }
        }

        if let Some(log) = &self.log {
            if let Err(err) = log.append(reading) {
                warn!(dir = %log.dir().display(), "{err}");
            }
        }
    }
}
