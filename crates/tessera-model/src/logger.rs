//! Logging capability handed to drivers.
//!
//! Drivers never write to a sink directly; they log through the [`Logger`]
//! they were initialized with, which lets a proxy forward log records across a
//! host boundary to whatever sink the caller chose.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Debug,
    Info,
    Important,
    Warning,
    Error,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogSeverity::Debug => "debug",
            LogSeverity::Info => "info",
            LogSeverity::Important => "important",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
        };
        f.write_str(s)
    }
}

pub trait Logger: Send + Sync {
    /// Record a message with optional error details.
    fn log(&self, severity: LogSeverity, message: &str, details: Option<&str>);

    fn debug(&self, message: &str) {
        self.log(LogSeverity::Debug, message, None);
    }

    fn info(&self, message: &str) {
        self.log(LogSeverity::Info, message, None);
    }

    fn warning(&self, message: &str, details: Option<&str>) {
        self.log(LogSeverity::Warning, message, details);
    }

    fn error(&self, message: &str, details: Option<&str>) {
        self.log(LogSeverity::Error, message, details);
    }
}

/// Forwards every record to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, severity: LogSeverity, message: &str, details: Option<&str>) {
        let details = details.unwrap_or("");
        match severity {
            LogSeverity::Debug => tracing::debug!(details = %details, "{}", message),
            LogSeverity::Info | LogSeverity::Important => {
                tracing::info!(severity = %severity, details = %details, "{}", message)
            }
            LogSeverity::Warning => tracing::warn!(details = %details, "{}", message),
            LogSeverity::Error => tracing::error!(details = %details, "{}", message),
        }
    }
}

/// A single captured log record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// In-memory logger (testing and diagnostics).
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries at or above `severity`.
    pub fn entries_at_least(&self, severity: LogSeverity) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.severity >= severity)
            .collect()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, severity: LogSeverity, message: &str, details: Option<&str>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                severity,
                message: message.to_string(),
                details: details.map(str::to_string),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_logger_filters_by_severity() {
        let logger = MemoryLogger::new();
        logger.debug("noise");
        logger.warning("teardown failed", Some("boom"));
        logger.error("fatal", None);

        assert_eq!(logger.entries().len(), 3);
        let important = logger.entries_at_least(LogSeverity::Warning);
        assert_eq!(important.len(), 2);
        assert_eq!(important[0].details.as_deref(), Some("boom"));
    }

    #[test]
    fn test_tracing_logger_does_not_panic() {
        TracingLogger.info("hello");
        TracingLogger.error("bad", Some("details"));
    }
}
