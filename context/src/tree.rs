//! Request-scoped span/log tree.
//!
//! The tree builder merges a hierarchical [`Span`] with the log batches a log
//! provider returned for it. Each node owns its logs (oldest first) and its
//! child nodes (earliest start first); both orderings are established here
//! and never re-sorted downstream.

use crate::models::{LogEntry, LogLevel, Span};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Logs of one provider response, keyed by owning span ID.
pub type LogBatch = HashMap<String, Vec<LogEntry>>;

/// A log line attached to a [`SpanNode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogNode {
    /// When the log was emitted.
    pub timestamp: DateTime<Utc>,
    /// Severity level.
    pub level: LogLevel,
    /// Originating file.
    pub file_name: String,
    /// Originating function.
    pub func_name: String,
    /// Log message.
    pub message: String,
    /// Originating line number.
    pub line_number: u32,
    /// Source line of the logging call, empty when unknown.
    pub source_code_line: String,
    /// Source lines above the logging call.
    pub source_code_lines_above: Vec<String>,
    /// Source lines below the logging call.
    pub source_code_lines_below: Vec<String>,
}

impl From<&LogEntry> for LogNode {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp: utc_from_seconds(entry.time),
            level: entry.level,
            file_name: entry.file_name.clone(),
            func_name: entry.function_name.clone(),
            message: entry.message.clone(),
            line_number: entry.line_number,
            source_code_line: entry.line.clone().unwrap_or_default(),
            source_code_lines_above: entry.lines_above.clone().unwrap_or_default(),
            source_code_lines_below: entry.lines_below.clone().unwrap_or_default(),
        }
    }
}

/// A span together with its logs and child spans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanNode {
    /// Span identifier.
    pub span_id: String,
    /// Fully qualified function name of the span.
    pub func_full_name: String,
    /// Span duration in seconds.
    pub latency: f64,
    /// Span start time.
    pub start_time: DateTime<Utc>,
    /// Span end time.
    pub end_time: DateTime<Utc>,
    /// Logs, ascending by timestamp.
    pub logs: Vec<LogNode>,
    /// Children, ascending by start time.
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    /// Creates a node without logs or children.
    #[must_use]
    pub fn new(span_id: impl Into<String>, func_full_name: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            span_id: span_id.into(),
            func_full_name: func_full_name.into(),
            latency: end_time - start_time,
            start_time: utc_from_seconds(start_time),
            end_time: utc_from_seconds(end_time),
            logs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns true when the node has neither logs nor children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.children.is_empty()
    }

    /// Number of logs in this subtree.
    #[must_use]
    pub fn total_logs(&self) -> usize {
        self.logs.len() + self.children.iter().map(SpanNode::total_logs).sum::<usize>()
    }

    /// Number of spans in this subtree, including this one.
    #[must_use]
    pub fn total_spans(&self) -> usize {
        1 + self.children.iter().map(SpanNode::total_spans).sum::<usize>()
    }

    /// A copy of this node's identity and metadata with the given content.
    #[must_use]
    pub fn with_content(&self, logs: Vec<LogNode>, children: Vec<SpanNode>) -> Self {
        Self {
            span_id: self.span_id.clone(),
            func_full_name: self.func_full_name.clone(),
            latency: self.latency,
            start_time: self.start_time,
            end_time: self.end_time,
            logs,
            children,
        }
    }
}

/// Builds the span/log tree rooted at `span`.
///
/// Batches are merged in order, so logs for the same span keep the order in
/// which the batches listed them until the timestamp sort (stable) is applied.
///
/// # Example
///
/// ```
/// use context::models::{LogEntry, LogLevel, Span};
/// use context::tree::{build_tree, LogBatch};
///
/// let root = Span::new("root", "main", 0.0, 2.0);
/// let batch = LogBatch::from([(
///     "root".to_string(),
///     vec![
///         LogEntry::new(1.5, LogLevel::Info, "second"),
///         LogEntry::new(0.5, LogLevel::Info, "first"),
///     ],
/// )]);
///
/// let tree = build_tree(&root, &[batch]);
/// assert_eq!(tree.logs[0].message, "first");
/// ```
#[must_use]
pub fn build_tree(span: &Span, log_batches: &[LogBatch]) -> SpanNode {
    let logs_map = merge_log_batches(log_batches);
    let tree = convert_span(span, &logs_map);

    tracing::debug!(
        span_id = %tree.span_id,
        spans = tree.total_spans(),
        logs = tree.total_logs(),
        "Built span tree"
    );

    tree
}

fn merge_log_batches(log_batches: &[LogBatch]) -> HashMap<&str, Vec<&LogEntry>> {
    let mut logs_map: HashMap<&str, Vec<&LogEntry>> = HashMap::new();
    for batch in log_batches {
        for (span_id, entries) in batch {
            logs_map.entry(span_id.as_str()).or_default().extend(entries);
        }
    }
    logs_map
}

fn convert_span(span: &Span, logs_map: &HashMap<&str, Vec<&LogEntry>>) -> SpanNode {
    let mut logs: Vec<LogNode> = logs_map
        .get(span.id.as_str())
        .map(|entries| entries.iter().map(|entry| LogNode::from(*entry)).collect())
        .unwrap_or_default();
    logs.sort_by_key(|log| log.timestamp);

    let mut children: Vec<SpanNode> = span
        .spans
        .iter()
        .map(|child| convert_span(child, logs_map))
        .collect();
    children.sort_by_key(|child| child.start_time);

    SpanNode {
        span_id: span.id.clone(),
        func_full_name: span.name.clone(),
        latency: span.duration,
        start_time: utc_from_seconds(span.start_time),
        end_time: utc_from_seconds(span.end_time),
        logs,
        children,
    }
}

/// Converts float seconds since the epoch to a UTC timestamp at microsecond
/// precision. Out-of-range values map to the epoch.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn utc_from_seconds(seconds: f64) -> DateTime<Utc> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}
