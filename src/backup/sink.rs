//! Destinations for run progress lines.
//!
//! Every line carries its own timestamp and level so that any sink (terminal, log file, a UI
//! subscribed to a channel) shows the same record.

use chrono::{DateTime, Local};
use derive_more::Display;
use getset::{CopyGetters, Getters};
use std::fmt::{Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

static TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LogLevel {
    #[display("INFO")]
    Info,
    #[display("WARN")]
    Warn,
    #[display("ERROR")]
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct LogLine {
    #[getset(get_copy = "pub")]
    at: DateTime<Local>,
    #[getset(get_copy = "pub")]
    level: LogLevel,
    #[getset(get = "pub")]
    message: String,
}

impl LogLine {
    pub fn now<S: Into<String>>(level: LogLevel, message: S) -> Self {
        Self {
            at: Local::now(),
            level,
            message: message.into(),
        }
    }
}

impl Display for LogLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.at.format(TIMESTAMP_FORMAT), self.message)
    }
}

/// Ordered, append-only destination for log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, line: LogLine);

    fn info(&self, message: &str) {
        self.write(LogLine::now(LogLevel::Info, message))
    }

    fn warn(&self, message: &str) {
        self.write(LogLine::now(LogLevel::Warn, message))
    }

    fn error(&self, message: &str) {
        self.write(LogLine::now(LogLevel::Error, message))
    }
}

/// Forwards lines to the `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, line: LogLine) {
        match line.level {
            LogLevel::Info => tracing::info!("{}", line.message),
            LogLevel::Warn => tracing::warn!("{}", line.message),
            LogLevel::Error => tracing::error!("{}", line.message),
        }
    }
}

/// Append-only log file, one `YYYY-MM-DD HH:MM:SS - message` line per record.
#[derive(Debug)]
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::from)
            .add_msg(format!("Failed to open log file {:?}", path))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn write(&self, line: LogLine) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("Failed to write log line: {e}");
        }
    }
}

/// Publishes lines to a channel, for an interface running on another thread.
#[derive(Debug)]
pub struct ChannelSink<T> {
    tx: Sender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }
}

impl<T: From<LogLine> + Send> LogSink for ChannelSink<T> {
    fn write(&self, line: LogLine) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.tx.send(line.into());
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .map(|line| line.message)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|line| line.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn write(&self, line: LogLine) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

/// Fans every line out to several sinks, in order.
#[derive(Clone, Default)]
pub struct TeeSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for TeeSink {
    fn write(&self, line: LogLine) {
        if let Some((last, rest)) = self.sinks.split_last() {
            rest.iter().for_each(|sink| sink.write(line.clone()));
            last.write(line);
        }
    }
}
