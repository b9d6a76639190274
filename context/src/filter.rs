//! Predicate-based pruning of a span tree.
//!
//! A [`LogFilter`] keeps the logs that satisfy every one of its predicates and
//! the spans that still hold matching content. Filtering never mutates its
//! input; it returns a new tree that shares nothing with the original.

use crate::feature::{FeatureOp, LogFeature};
use crate::projector::format_timestamp;
use crate::tree::{LogNode, SpanNode};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Errors raised while configuring a filter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// The positional predicate arrays differ in length.
    #[error(
        "Predicate arrays must have the same length \
         (features: {features}, values: {values}, operations: {operations})"
    )]
    LengthMismatch {
        /// Number of features.
        features: usize,
        /// Number of values.
        values: usize,
        /// Number of operations.
        operations: usize,
    },
}

/// One (feature, value, operation) condition on a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPredicate {
    /// The log attribute to test.
    pub feature: LogFeature,
    /// The target value; compared case-insensitively.
    pub value: String,
    /// The comparison.
    pub op: FeatureOp,
}

impl LogPredicate {
    /// Creates a predicate.
    #[must_use]
    pub fn new(feature: LogFeature, op: FeatureOp, value: impl Into<String>) -> Self {
        Self {
            feature,
            value: value.into(),
            op,
        }
    }

    fn matches(&self, log: &LogNode, include_source_context: bool) -> bool {
        let actual = predicate_value(log, self.feature, include_source_context).to_lowercase();
        let target = self.value.to_lowercase();
        match self.op {
            FeatureOp::Equal => actual == target,
            FeatureOp::NotEqual => actual != target,
            FeatureOp::Contains => actual.contains(&target),
            FeatureOp::NotContains => !actual.contains(&target),
        }
    }
}

/// The string a predicate compares against.
///
/// Context lines are joined with newlines when `include_source_context` is
/// set and compare as empty otherwise.
fn predicate_value(log: &LogNode, feature: LogFeature, include_source_context: bool) -> Cow<'_, str> {
    match feature {
        LogFeature::Timestamp => Cow::Owned(format_timestamp(&log.timestamp)),
        LogFeature::Level => Cow::Owned(log.level.to_string()),
        LogFeature::FileName => Cow::Borrowed(log.file_name.as_str()),
        LogFeature::FuncName => Cow::Borrowed(log.func_name.as_str()),
        LogFeature::Message => Cow::Borrowed(log.message.as_str()),
        LogFeature::LineNumber => Cow::Owned(log.line_number.to_string()),
        LogFeature::SourceCodeLine => Cow::Borrowed(log.source_code_line.as_str()),
        LogFeature::SourceCodeLinesAbove if include_source_context => {
            Cow::Owned(log.source_code_lines_above.join("\n"))
        }
        LogFeature::SourceCodeLinesBelow if include_source_context => {
            Cow::Owned(log.source_code_lines_below.join("\n"))
        }
        LogFeature::SourceCodeLinesAbove | LogFeature::SourceCodeLinesBelow => Cow::Borrowed(""),
    }
}

/// A conjunction of log predicates.
///
/// # Example
///
/// ```
/// use context::feature::{FeatureOp, LogFeature};
/// use context::filter::{LogFilter, LogPredicate};
/// use context::models::{LogEntry, LogLevel, Span};
/// use context::tree::{build_tree, LogBatch};
///
/// let root = Span::new("root", "main", 0.0, 1.0);
/// let batch = LogBatch::from([(
///     "root".to_string(),
///     vec![
///         LogEntry::new(0.1, LogLevel::Info, "ok"),
///         LogEntry::new(0.2, LogLevel::Error, "boom"),
///     ],
/// )]);
/// let tree = build_tree(&root, &[batch]);
///
/// let filter = LogFilter::new(vec![LogPredicate::new(LogFeature::Level, FeatureOp::Equal, "error")]);
/// let filtered = filter.apply(&tree);
/// assert_eq!(filtered.logs.len(), 1);
/// assert_eq!(filtered.logs[0].message, "boom");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Predicates that must all hold.
    pub predicates: Vec<LogPredicate>,
    /// Whether context-line features compare against the joined lines.
    #[serde(default)]
    pub include_source_context: bool,
}

impl LogFilter {
    /// Creates a filter from predicates.
    #[must_use]
    pub fn new(predicates: Vec<LogPredicate>) -> Self {
        Self {
            predicates,
            include_source_context: false,
        }
    }

    /// Creates a filter from three positional arrays.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::LengthMismatch`] if the arrays differ in length.
    pub fn from_parallel(
        features: &[LogFeature],
        values: &[String],
        operations: &[FeatureOp],
    ) -> Result<Self, FilterError> {
        if features.len() != values.len() || features.len() != operations.len() {
            return Err(FilterError::LengthMismatch {
                features: features.len(),
                values: values.len(),
                operations: operations.len(),
            });
        }

        let predicates = features
            .iter()
            .zip(values)
            .zip(operations)
            .map(|((&feature, value), &op)| LogPredicate::new(feature, op, value.clone()))
            .collect();
        Ok(Self::new(predicates))
    }

    /// Enables comparing context-line features against the joined lines.
    #[must_use]
    pub fn with_source_context(mut self, include_source_context: bool) -> Self {
        self.include_source_context = include_source_context;
        self
    }

    /// Returns true if `log` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, log: &LogNode) -> bool {
        self.predicates
            .iter()
            .all(|p| p.matches(log, self.include_source_context))
    }

    /// Returns a pruned copy of `node`.
    ///
    /// The node keeps its matching logs and the filtered children that still
    /// have logs or children. The root itself is always returned, even when
    /// nothing matched.
    #[must_use]
    pub fn apply(&self, node: &SpanNode) -> SpanNode {
        let logs = node
            .logs
            .iter()
            .filter(|log| self.matches(log))
            .cloned()
            .collect();

        let children = node
            .children
            .iter()
            .map(|child| self.apply(child))
            .filter(|child| !child.is_empty())
            .collect();

        node.with_content(logs, children)
    }
}

/// Filters `node` with predicates given as three positional arrays.
///
/// # Errors
///
/// Returns [`FilterError::LengthMismatch`] before touching the tree if the
/// arrays differ in length.
pub fn filter_log_node(
    node: &SpanNode,
    features: &[LogFeature],
    values: &[String],
    operations: &[FeatureOp],
) -> Result<SpanNode, FilterError> {
    let filter = LogFilter::from_parallel(features, values, operations)?;
    let filtered = filter.apply(node);

    tracing::debug!(
        span_id = %node.span_id,
        logs_before = node.total_logs(),
        logs_after = filtered.total_logs(),
        "Filtered span tree"
    );

    Ok(filtered)
}

/// Filter request in the positional shape an external log-node selector
/// produces: the i-th feature, value and operation form one predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogNodeSelection {
    /// Features to test.
    #[serde(default)]
    pub log_features: Vec<LogFeature>,
    /// Target values.
    #[serde(default)]
    pub log_feature_values: Vec<String>,
    /// Operations.
    #[serde(default)]
    pub log_feature_ops: Vec<FeatureOp>,
}

impl LogNodeSelection {
    /// Converts the selection into a [`LogFilter`].
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::LengthMismatch`] if the arrays differ in length.
    pub fn to_filter(&self) -> Result<LogFilter, FilterError> {
        LogFilter::from_parallel(
            &self.log_features,
            &self.log_feature_values,
            &self.log_feature_ops,
        )
    }
}
