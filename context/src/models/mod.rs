//! Raw telemetry models.
//!
//! These are the flat records a trace or log provider client hands to the
//! context core. They are read-only once produced.

pub mod log;
pub mod span;
pub mod trace;

pub use log::{LogEntry, LogLevel, ParseLogLevelError};
pub use span::{LogCounts, Span, SpanValidationError};
pub use trace::{
    assign_percentiles, collect_span_latencies, sort_spans_recursively, Percentile, Trace,
};
