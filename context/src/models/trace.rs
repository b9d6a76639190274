//! Trace data model and post-processing.
//!
//! A `Trace` owns its root spans. The aggregate fields (log counters, the
//! language set) are derived by [`Trace::accumulate`] once spans are attached.

use crate::models::{LogCounts, Span};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Minimum number of traces before latency percentiles are computed.
const PERCENTILE_MIN_TRACES: usize = 100;

/// Latency percentile bucket of a trace relative to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Percentile {
    /// At or below the median.
    #[default]
    P50,
    /// At or below the 90th percentile.
    P90,
    /// At or below the 95th percentile.
    P95,
    /// Above the 95th percentile.
    P99,
}

impl std::fmt::Display for Percentile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P50 => write!(f, "P50"),
            Self::P90 => write!(f, "P90"),
            Self::P95 => write!(f, "P95"),
            Self::P99 => write!(f, "P99"),
        }
    }
}

/// A trace: the spans of one end-to-end request plus derived aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// The trace ID.
    pub id: String,

    /// Start time in seconds since the Unix epoch.
    pub start_time: f64,

    /// End time in seconds since the Unix epoch.
    pub end_time: f64,

    /// Duration in seconds.
    pub duration: f64,

    /// Latency bucket relative to the other traces of the same listing.
    #[serde(default)]
    pub percentile: Percentile,

    /// Root spans, ordered by start time after [`Trace::accumulate`].
    #[serde(default)]
    pub spans: Vec<Span>,

    /// Name of the service that produced the trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Deployment environment of that service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_environment: Option<String>,

    /// Log counters summed over every span.
    #[serde(flatten)]
    pub log_counts: LogCounts,

    /// Instrumentation languages observed across all spans.
    #[serde(default, rename = "telemetry_sdk_language")]
    pub telemetry_sdk_languages: BTreeSet<String>,
}

impl Trace {
    /// Creates an empty trace covering `[start_time, start_time + duration]`.
    #[must_use]
    pub fn new(id: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self {
            id: id.into(),
            start_time,
            end_time: start_time + duration,
            duration,
            percentile: Percentile::default(),
            spans: Vec::new(),
            service_name: None,
            service_environment: None,
            log_counts: LogCounts::default(),
            telemetry_sdk_languages: BTreeSet::new(),
        }
    }

    /// Attaches root spans.
    #[must_use]
    pub fn with_spans(mut self, spans: Vec<Span>) -> Self {
        self.spans = spans;
        self
    }

    /// Sets the service name and environment.
    #[must_use]
    pub fn with_service(
        mut self,
        service_name: Option<String>,
        service_environment: Option<String>,
    ) -> Self {
        self.service_name = service_name;
        self.service_environment = service_environment;
        self
    }

    /// Runs the post-processing pass over the attached spans.
    ///
    /// Sorts every level of the span forest by start time, rolls each span's
    /// log counters up so they include all descendants, sums the root
    /// counters into the trace, collects the language set and aligns the
    /// trace bounds with the first root span.
    ///
    /// Span counters are rolled up in place, so this runs once per trace.
    pub fn accumulate(&mut self) {
        if self.spans.is_empty() {
            return;
        }

        sort_spans_recursively(&mut self.spans);
        self.start_time = self.spans[0].start_time;
        self.end_time = self.spans[0].end_time;

        let mut totals = LogCounts::default();
        for span in &mut self.spans {
            totals += roll_up_log_counts(span);
            collect_languages(span, &mut self.telemetry_sdk_languages);
        }
        self.log_counts = totals;
    }

    /// Returns the number of spans in this trace.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.spans.iter().map(Span::subtree_len).sum()
    }
}

/// Sorts spans by start time at every level of the forest.
pub fn sort_spans_recursively(spans: &mut [Span]) {
    spans.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    for span in spans {
        sort_spans_recursively(&mut span.spans);
    }
}

fn roll_up_log_counts(span: &mut Span) -> LogCounts {
    let mut counts = span.log_counts;
    for child in &mut span.spans {
        counts += roll_up_log_counts(child);
    }
    span.log_counts = counts;
    counts
}

fn collect_languages(span: &Span, languages: &mut BTreeSet<String>) {
    if let Some(ref language) = span.telemetry_sdk_language {
        languages.insert(language.clone());
    }
    for child in &span.spans {
        collect_languages(child, languages);
    }
}

/// Buckets every trace's duration into a latency percentile.
///
/// Percentiles are only meaningful with enough samples: with 100 traces or
/// fewer every trace is labelled [`Percentile::P50`].
pub fn assign_percentiles(traces: &mut [Trace]) {
    if traces.len() <= PERCENTILE_MIN_TRACES {
        for trace in traces.iter_mut() {
            trace.percentile = Percentile::P50;
        }
        return;
    }

    let mut durations: Vec<f64> = traces.iter().map(|t| t.duration).collect();
    durations.sort_by(f64::total_cmp);
    let p50 = percentile_of(&durations, 50.0);
    let p90 = percentile_of(&durations, 90.0);
    let p95 = percentile_of(&durations, 95.0);

    for trace in traces.iter_mut() {
        trace.percentile = if trace.duration <= p50 {
            Percentile::P50
        } else if trace.duration <= p90 {
            Percentile::P90
        } else if trace.duration <= p95 {
            Percentile::P95
        } else {
            Percentile::P99
        };
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percentile_of(sorted: &[f64], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Maps every span ID in the forest to its duration.
#[must_use]
pub fn collect_span_latencies(spans: &[Span]) -> HashMap<String, f64> {
    fn walk(spans: &[Span], out: &mut HashMap<String, f64>) {
        for span in spans {
            out.insert(span.id.clone(), span.duration);
            walk(&span.spans, out);
        }
    }

    let mut latencies = HashMap::new();
    walk(spans, &mut latencies);
    latencies
}
