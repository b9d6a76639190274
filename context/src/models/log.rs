//! Log data model.
//!
//! Defines the `LogEntry` record a log provider hands to the context core,
//! one per structured log line attributed to a span.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Log severity level.
///
/// Mirrors the five levels the instrumentation SDKs report counters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    #[serde(alias = "debug")]
    Debug,
    /// Informational messages.
    #[serde(alias = "info")]
    Info,
    /// Warning conditions.
    #[serde(alias = "warning", alias = "WARN", alias = "warn")]
    Warning,
    /// Error conditions.
    #[serde(alias = "error")]
    Error,
    /// Critical/fatal conditions.
    #[serde(alias = "critical", alias = "FATAL", alias = "fatal")]
    Critical,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Error returned when a string is not a known log level.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown log level: '{0}'")]
pub struct ParseLogLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// A single structured log line attributed to a span.
///
/// The record is immutable once a provider client has produced it.
///
/// # Example
///
/// ```
/// use context::models::{LogEntry, LogLevel};
///
/// let log = LogEntry::new(1_700_000_000.5, LogLevel::Error, "payment declined")
///     .with_location("billing.py", "charge", 42)
///     .with_source_line("logger.error(\"payment declined\")");
///
/// assert_eq!(log.line_number, 42);
/// assert_eq!(log.line.as_deref(), Some("logger.error(\"payment declined\")"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub time: f64,

    /// Severity level.
    #[serde(default)]
    pub level: LogLevel,

    /// The log message.
    pub message: String,

    /// Function that emitted the log.
    #[serde(default)]
    pub function_name: String,

    /// File that emitted the log.
    #[serde(default)]
    pub file_name: String,

    /// Line number of the logging call.
    #[serde(default)]
    pub line_number: u32,

    /// Repository the source file lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,

    /// Revision the source line was resolved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,

    /// The source line of the logging call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,

    /// Source lines above the logging call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_above: Option<Vec<String>>,

    /// Source lines below the logging call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_below: Option<Vec<String>>,
}

impl LogEntry {
    /// Creates a log entry with an empty source location.
    #[must_use]
    pub fn new(time: f64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time,
            level,
            message: message.into(),
            function_name: String::new(),
            file_name: String::new(),
            line_number: 0,
            git_url: None,
            commit_id: None,
            line: None,
            lines_above: None,
            lines_below: None,
        }
    }

    /// Sets the originating file, function and line.
    #[must_use]
    pub fn with_location(
        mut self,
        file_name: impl Into<String>,
        function_name: impl Into<String>,
        line_number: u32,
    ) -> Self {
        self.file_name = file_name.into();
        self.function_name = function_name.into();
        self.line_number = line_number;
        self
    }

    /// Sets the source line of the logging call.
    #[must_use]
    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }

    /// Sets the surrounding source lines.
    #[must_use]
    pub fn with_context_lines(mut self, above: Vec<String>, below: Vec<String>) -> Self {
        self.lines_above = Some(above);
        self.lines_below = Some(below);
        self
    }

    /// Sets the repository URL and revision.
    #[must_use]
    pub fn with_repository(mut self, git_url: impl Into<String>, commit_id: impl Into<String>) -> Self {
        self.git_url = Some(git_url.into());
        self.commit_id = Some(commit_id.into());
        self
    }
}
