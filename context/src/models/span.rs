//! Span data model.
//!
//! A `Span` is one recorded unit of work as delivered by a trace provider.
//! Spans own their children, so a reconstructed trace is a plain tree.

use crate::models::LogLevel;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use thiserror::Error;
use validator::Validate;

/// Per-level log counters attached to spans and traces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCounts {
    /// Number of DEBUG logs.
    #[serde(default, rename = "num_debug_logs")]
    pub debug: u64,
    /// Number of INFO logs.
    #[serde(default, rename = "num_info_logs")]
    pub info: u64,
    /// Number of WARNING logs.
    #[serde(default, rename = "num_warning_logs")]
    pub warning: u64,
    /// Number of ERROR logs.
    #[serde(default, rename = "num_error_logs")]
    pub error: u64,
    /// Number of CRITICAL logs.
    #[serde(default, rename = "num_critical_logs")]
    pub critical: u64,
}

impl LogCounts {
    /// Increments the counter for `level`.
    pub fn record(&mut self, level: LogLevel) {
        match level {
            LogLevel::Debug => self.debug += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Warning => self.warning += 1,
            LogLevel::Error => self.error += 1,
            LogLevel::Critical => self.critical += 1,
        }
    }

    /// Returns the counter for `level`.
    #[must_use]
    pub fn get(&self, level: LogLevel) -> u64 {
        match level {
            LogLevel::Debug => self.debug,
            LogLevel::Info => self.info,
            LogLevel::Warning => self.warning,
            LogLevel::Error => self.error,
            LogLevel::Critical => self.critical,
        }
    }

    /// Sum over all levels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.debug + self.info + self.warning + self.error + self.critical
    }
}

impl AddAssign for LogCounts {
    fn add_assign(&mut self, other: Self) {
        self.debug += other.debug;
        self.info += other.info;
        self.warning += other.warning;
        self.error += other.error;
        self.critical += other.critical;
    }
}

/// A span representing a unit of work in a distributed trace.
///
/// # Example
///
/// ```
/// use context::models::Span;
///
/// let root = Span::new("span-1", "api.handle_request", 100.0, 100.5)
///     .with_child(Span::new("span-2", "db.query", 100.1, 100.2));
///
/// assert_eq!(root.spans.len(), 1);
/// assert!(root.validate_span().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Span {
    /// Unique identifier of the span.
    #[validate(length(min = 1, message = "Span ID cannot be empty"))]
    pub id: String,

    /// Identifier of the parent span, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Display name, usually the fully qualified function name.
    pub name: String,

    /// Start time in seconds since the Unix epoch.
    pub start_time: f64,

    /// End time in seconds since the Unix epoch.
    pub end_time: f64,

    /// Duration in seconds.
    pub duration: f64,

    /// Log counters for this span.
    #[serde(flatten)]
    pub log_counts: LogCounts,

    /// Language of the instrumentation SDK that produced the span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_sdk_language: Option<String>,

    /// Child spans.
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// Errors that can occur during span validation.
#[derive(Debug, Error)]
pub enum SpanValidationError {
    /// The span ID is empty.
    #[error("Span ID cannot be empty")]
    EmptySpanId,

    /// The end time is before the start time.
    #[error("End time cannot be before start time")]
    InvalidTimeRange,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Span {
    /// Creates a span without children; the duration is derived from the bounds.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            name: name.into(),
            start_time,
            end_time,
            duration: end_time - start_time,
            log_counts: LogCounts::default(),
            telemetry_sdk_language: None,
            spans: Vec::new(),
        }
    }

    /// Sets the parent span ID.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Appends a child span.
    #[must_use]
    pub fn with_child(mut self, child: Span) -> Self {
        self.spans.push(child);
        self
    }

    /// Sets the log counters.
    #[must_use]
    pub fn with_log_counts(mut self, log_counts: LogCounts) -> Self {
        self.log_counts = log_counts;
        self
    }

    /// Sets the instrumentation language tag.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.telemetry_sdk_language = Some(language.into());
        self
    }

    /// Returns true if the span has no known parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of spans in this subtree, including this one.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.spans.iter().map(Span::subtree_len).sum::<usize>()
    }

    /// Validates the span.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The span ID is empty
    /// - The end time is before the start time
    pub fn validate_span(&self) -> Result<(), SpanValidationError> {
        if self.id.is_empty() {
            return Err(SpanValidationError::EmptySpanId);
        }
        if self.end_time < self.start_time {
            return Err(SpanValidationError::InvalidTimeRange);
        }
        self.validate()?;
        Ok(())
    }
}
