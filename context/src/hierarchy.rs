//! Span hierarchy reconstruction.
//!
//! Reference-based trace backends deliver spans as a flat list where each
//! span points at its parent. This module turns such a list into a forest of
//! owned [`Span`] trees.

use crate::models::{Span, SpanValidationError, Trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of relation a span reference expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// The referenced span is the parent.
    ChildOf,
    /// The referenced span causally precedes this one but is not its parent.
    FollowsFrom,
}

/// A reference from one span to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanReference {
    /// The relation type.
    pub ref_type: ReferenceType,
    /// The referenced span ID.
    pub span_id: String,
}

impl SpanReference {
    /// Creates a child-of reference to `span_id`.
    #[must_use]
    pub fn child_of(span_id: impl Into<String>) -> Self {
        Self {
            ref_type: ReferenceType::ChildOf,
            span_id: span_id.into(),
        }
    }

    /// Creates a follows-from reference to `span_id`.
    #[must_use]
    pub fn follows_from(span_id: impl Into<String>) -> Self {
        Self {
            ref_type: ReferenceType::FollowsFrom,
            span_id: span_id.into(),
        }
    }
}

/// A flat span as delivered by a reference-based backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// The span itself.
    #[serde(flatten)]
    pub span: Span,

    /// References to other spans.
    #[serde(default)]
    pub references: Vec<SpanReference>,
}

impl SpanRecord {
    /// Wraps a span without references; its own `parent_id` is used.
    #[must_use]
    pub fn new(span: Span) -> Self {
        Self {
            span,
            references: Vec::new(),
        }
    }

    /// Adds a reference.
    #[must_use]
    pub fn with_reference(mut self, reference: SpanReference) -> Self {
        self.references.push(reference);
        self
    }

    /// The parent span ID: the first child-of reference, else the span's own
    /// `parent_id`.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.references
            .iter()
            .find(|r| r.ref_type == ReferenceType::ChildOf)
            .map(|r| r.span_id.as_str())
            .or(self.span.parent_id.as_deref())
    }
}

impl From<Span> for SpanRecord {
    fn from(span: Span) -> Self {
        Self::new(span)
    }
}

/// Builds a span forest from flat records.
///
/// Each span is attached to its parent when the parent ID resolves to another
/// record in the batch; otherwise it becomes a root. A dangling parent ID is
/// kept on the promoted span so callers can tell it was orphaned. Roots and
/// siblings keep input order.
///
/// Records without an ID are skipped. A span that ends before it starts is
/// kept as is. A later record with an already seen ID replaces the earlier
/// one in place. Spans caught in a parent cycle are unreachable from any root
/// and are dropped.
///
/// # Example
///
/// ```
/// use context::hierarchy::{build_span_hierarchy, SpanRecord, SpanReference};
/// use context::models::Span;
///
/// let records = vec![
///     SpanRecord::new(Span::new("root", "main", 0.0, 1.0)),
///     SpanRecord::new(Span::new("child", "work", 0.2, 0.4))
///         .with_reference(SpanReference::child_of("root")),
/// ];
///
/// let roots = build_span_hierarchy(records);
/// assert_eq!(roots.len(), 1);
/// assert_eq!(roots[0].spans[0].id, "child");
/// ```
#[must_use]
pub fn build_span_hierarchy(records: impl IntoIterator<Item = SpanRecord>) -> Vec<Span> {
    let mut slots: Vec<Option<Span>> = Vec::new();
    let mut parents: Vec<Option<String>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        match record.span.validate_span() {
            Ok(()) => {}
            Err(SpanValidationError::InvalidTimeRange) => {
                tracing::warn!(
                    span_id = %record.span.id,
                    start_time = record.span.start_time,
                    end_time = record.span.end_time,
                    "Span ends before it starts"
                );
            }
            Err(err) => {
                tracing::warn!(span_id = %record.span.id, error = %err, "Skipping invalid span record");
                continue;
            }
        }

        let parent = record.parent_id().map(str::to_owned);
        if let Some(&idx) = index.get(&record.span.id) {
            tracing::warn!(span_id = %record.span.id, "Duplicate span record replaces the earlier one");
            parents[idx] = parent;
            slots[idx] = Some(record.span);
            continue;
        }

        index.insert(record.span.id.clone(), slots.len());
        parents.push(parent);
        slots.push(Some(record.span));
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
    let mut roots: Vec<usize> = Vec::new();

    for (idx, parent) in parents.iter().enumerate() {
        let resolved = parent.as_ref().and_then(|p| index.get(p)).copied();
        match resolved {
            Some(parent_idx) if parent_idx != idx => {
                children[parent_idx].push(idx);
                if let Some(span) = slots[idx].as_mut() {
                    span.parent_id.clone_from(parent);
                }
            }
            _ => {
                if let Some(parent_id) = parent {
                    tracing::debug!(
                        parent_id = %parent_id,
                        "Parent span not found, promoting span to root"
                    );
                }
                roots.push(idx);
            }
        }
    }

    let forest: Vec<Span> = roots
        .into_iter()
        .filter_map(|idx| attach(idx, &mut slots, &children))
        .collect();

    let unreachable = slots.iter().filter(|slot| slot.is_some()).count();
    if unreachable > 0 {
        tracing::warn!(count = unreachable, "Dropping spans on a parent cycle");
    }

    forest
}

fn attach(idx: usize, slots: &mut [Option<Span>], children: &[Vec<usize>]) -> Option<Span> {
    let mut span = slots[idx].take()?;
    for &child in &children[idx] {
        if let Some(child_span) = attach(child, slots, children) {
            span.spans.push(child_span);
        }
    }
    Some(span)
}

/// Reconstructs the hierarchy of a flat trace and runs trace post-processing.
///
/// Trace bounds start as the earliest start and latest end across all
/// records, then [`Trace::accumulate`] aligns them with the first root span.
/// Returns `None` when no valid span remains.
#[must_use]
pub fn assemble_trace(trace_id: impl Into<String>, records: Vec<SpanRecord>) -> Option<Trace> {
    let start = records
        .iter()
        .map(|r| r.span.start_time)
        .min_by(f64::total_cmp)?;
    let end = records
        .iter()
        .map(|r| r.span.end_time)
        .max_by(f64::total_cmp)?;

    let roots = build_span_hierarchy(records);
    if roots.is_empty() {
        return None;
    }

    let mut trace = Trace::new(trace_id, start, end - start).with_spans(roots);
    trace.accumulate();
    Some(trace)
}
