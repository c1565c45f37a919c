//! # Logger Service
//!
//! Structured logging sinks for the remote action engine.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured, not text-based or printf-style.
//! It is also advisory: a sink sees what happened, but every failure is
//! still delivered through the protocol whether or not anyone logs it.
//!
//! ## Sinks
//!
//! - [`SilentLogger`]: drops everything (the default)
//! - [`MemoryLogger`]: keeps entries for inspection in tests
//! - [`FacadeLogger`]: forwards to the `log` crate

use std::fmt;
use std::sync::{Arc, Mutex};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Looks up a field value
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Destination for log entries
pub trait Logger: Send + Sync {
    /// Records one entry
    fn log(&self, entry: LogEntry);

    fn info(&self, entry: LogEntry) {
        self.log(LogEntry {
            level: LogLevel::Info,
            ..entry
        });
    }

    fn error(&self, entry: LogEntry) {
        self.log(LogEntry {
            level: LogLevel::Error,
            ..entry
        });
    }
}

/// Shared logger handle
pub type SharedLogger = Arc<dyn Logger>;

/// Drops every entry
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn log(&self, _entry: LogEntry) {}
}

/// Keeps every entry in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded entries
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Entries whose message equals `message`
    pub fn with_message(&self, message: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.message == message)
            .collect()
    }

    /// Number of entries at `level`
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }
}

/// Forwards entries to the `log` facade
#[derive(Debug, Clone)]
pub struct FacadeLogger {
    target: String,
}

impl FacadeLogger {
    /// Logs under the given target
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for FacadeLogger {
    fn default() -> Self {
        Self::new("remote_ipc")
    }
}

impl Logger for FacadeLogger {
    fn log(&self, entry: LogEntry) {
        let level = log::Level::from(entry.level);
        log::log!(target: self.target.as_str(), level, "{}", entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_entry_creation() {
        let entry = LogEntry::new(LogLevel::Info, "test message");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "test message");
        assert!(entry.fields.is_empty());
    }

    #[test]
    fn test_log_entry_with_fields() {
        let entry = LogEntry::new(LogLevel::Info, "test")
            .with_field("key1", "value1")
            .with_field("key2", 2);

        assert_eq!(entry.fields.len(), 2);
        assert_eq!(entry.field("key1"), Some("value1"));
        assert_eq!(entry.field("key2"), Some("2"));
        assert_eq!(entry.field("missing"), None);
        assert_eq!(entry.to_string(), "test key1=value1 key2=2");
    }

    #[test]
    fn test_level_helpers_override_level() {
        let logger = MemoryLogger::new();
        logger.info(LogEntry::new(LogLevel::Debug, "a"));
        logger.error(LogEntry::new(LogLevel::Debug, "b"));

        assert_eq!(logger.count(LogLevel::Info), 1);
        assert_eq!(logger.count(LogLevel::Error), 1);
        assert_eq!(logger.with_message("b")[0].level, LogLevel::Error);
    }

    #[test]
    fn test_memory_logger_clear() {
        let logger = MemoryLogger::new();
        logger.log(LogEntry::new(LogLevel::Warn, "x"));
        assert_eq!(logger.entries().len(), 1);

        logger.clear();
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_silent_and_facade_loggers_accept_entries() {
        SilentLogger.info(LogEntry::new(LogLevel::Info, "dropped"));
        FacadeLogger::default().error(LogEntry::new(LogLevel::Error, "forwarded"));
    }
}
