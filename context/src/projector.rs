//! Feature projection of a span tree.
//!
//! Projection turns a [`SpanNode`] into an ordered JSON mapping containing the
//! span identifier, its name, the selected span attributes and then every log
//! and child span interleaved by time. Logs are keyed `log_0`, `log_1`, … per
//! level; child spans are keyed by their own identifier. A key that is
//! already taken gets a `#2`, `#3`, … suffix. For a given tree and selection
//! the key order is always the same.

use crate::chunk::PARENT_CONTEXT_KEY;
use crate::feature::{FeatureSelection, LogFeature, SpanFeature};
use crate::tree::{LogNode, SpanNode};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Key of the span identifier in a projected span.
pub const SPAN_ID_KEY: &str = "span_id";

/// Key of the span name in a projected span.
pub const SPAN_NAME_KEY: &str = "func_full_name";

/// Prefix of positional log keys.
pub const LOG_KEY_PREFIX: &str = "log_";

/// Projects `node` with the given span and log attributes.
///
/// # Example
///
/// ```
/// use context::feature::SpanFeature;
/// use context::projector::project;
/// use context::tree::SpanNode;
///
/// let node = SpanNode::new("span-1", "api.handle", 0.0, 1.5);
/// let projected = project(&node, &[SpanFeature::Latency], &[]);
///
/// let keys: Vec<&str> = projected.keys().map(String::as_str).collect();
/// assert_eq!(keys, vec!["span_id", "func_full_name", "span latency"]);
/// assert_eq!(projected["span latency"], "1.5");
/// ```
#[must_use]
pub fn project(
    node: &SpanNode,
    span_features: &[SpanFeature],
    log_features: &[LogFeature],
) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(SPAN_ID_KEY.to_string(), Value::String(node.span_id.clone()));
    out.insert(SPAN_NAME_KEY.to_string(), Value::String(node.func_full_name.clone()));

    for &feature in span_features {
        out.insert(feature.label().to_string(), span_feature_value(node, feature));
    }

    // Both lists are already time-ordered; merge them, logs first on ties.
    let mut logs = node.logs.iter().peekable();
    let mut children = node.children.iter().peekable();
    let mut log_index = 0usize;
    loop {
        let take_log = match (logs.peek(), children.peek()) {
            (Some(log), Some(child)) => log.timestamp <= child.start_time,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        if take_log {
            if let Some(log) = logs.next() {
                insert_unique(
                    &mut out,
                    &node.span_id,
                    format!("{LOG_KEY_PREFIX}{log_index}"),
                    Value::Object(project_log(log, log_features)),
                );
                log_index += 1;
            }
        } else if let Some(child) = children.next() {
            insert_unique(
                &mut out,
                &node.span_id,
                child.span_id.clone(),
                Value::Object(project(child, span_features, log_features)),
            );
        }
    }

    out
}

/// Inserts `value` under `key`, or under `key#N` when `key` is already taken,
/// for example by a child span whose ID looks like a log key.
fn insert_unique(out: &mut Map<String, Value>, span_id: &str, key: String, value: Value) {
    if !out.contains_key(&key) && key != PARENT_CONTEXT_KEY {
        out.insert(key, value);
        return;
    }

    let mut suffix = 2usize;
    let mut unique = format!("{key}#{suffix}");
    while out.contains_key(&unique) {
        suffix += 1;
        unique = format!("{key}#{suffix}");
    }
    tracing::warn!(
        span_id = %span_id,
        key = %key,
        renamed = %unique,
        "Projected key collides with an existing entry; renaming"
    );
    out.insert(unique, value);
}

/// Projects `node` with a [`FeatureSelection`].
#[must_use]
pub fn project_selection(node: &SpanNode, selection: &FeatureSelection) -> Map<String, Value> {
    project(node, &selection.span_features, &selection.log_features)
}

/// Projects one log with the given attributes, in selection order.
#[must_use]
pub fn project_log(log: &LogNode, features: &[LogFeature]) -> Map<String, Value> {
    features
        .iter()
        .map(|&feature| (feature.label().to_string(), log_feature_value(log, feature)))
        .collect()
}

/// The projected value of a span attribute.
#[must_use]
pub fn span_feature_value(node: &SpanNode, feature: SpanFeature) -> Value {
    match feature {
        SpanFeature::Latency => Value::String(format_seconds(node.latency)),
        SpanFeature::StartTime => Value::String(format_timestamp(&node.start_time)),
        SpanFeature::EndTime => Value::String(format_timestamp(&node.end_time)),
    }
}

/// The projected value of a log attribute.
#[must_use]
pub fn log_feature_value(log: &LogNode, feature: LogFeature) -> Value {
    match feature {
        LogFeature::Timestamp => Value::String(format_timestamp(&log.timestamp)),
        LogFeature::Level => Value::String(log.level.to_string()),
        LogFeature::FileName => Value::String(log.file_name.clone()),
        LogFeature::FuncName => Value::String(log.func_name.clone()),
        LogFeature::Message => Value::String(log.message.clone()),
        LogFeature::LineNumber => Value::String(log.line_number.to_string()),
        LogFeature::SourceCodeLine => Value::String(log.source_code_line.clone()),
        LogFeature::SourceCodeLinesAbove => string_array(&log.source_code_lines_above),
        LogFeature::SourceCodeLinesBelow => string_array(&log.source_code_lines_below),
    }
}

fn string_array(lines: &[String]) -> Value {
    Value::Array(lines.iter().cloned().map(Value::String).collect())
}

/// Renders a timestamp as `YYYY-MM-DD HH:MM:SS[.ffffff]+00:00`.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.format("%Y-%m-%d %H:%M:%S+00:00").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.6f+00:00").to_string()
    }
}

/// Renders seconds with at least one fractional digit (`2.0`, `1.25`).
#[must_use]
pub fn format_seconds(seconds: f64) -> String {
    if seconds.is_finite() && seconds.fract() == 0.0 {
        format!("{seconds:.1}")
    } else {
        format!("{seconds}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogEntry, LogLevel, Span};
    use crate::tree::{build_tree, LogBatch};

    fn sample_tree() -> SpanNode {
        let root = Span::new("root", "app.main", 1_672_574_400.0, 1_672_574_410.0)
            .with_child(Span::new("child-b", "app.b", 1_672_574_405.0, 1_672_574_406.0))
            .with_child(Span::new("child-a", "app.a", 1_672_574_401.0, 1_672_574_402.0));
        let batch = LogBatch::from([
            (
                "root".to_string(),
                vec![
                    LogEntry::new(1_672_574_400.5, LogLevel::Info, "start"),
                    LogEntry::new(1_672_574_403.0, LogLevel::Warning, "slow"),
                    LogEntry::new(1_672_574_409.0, LogLevel::Info, "done"),
                ],
            ),
            (
                "child-a".to_string(),
                vec![LogEntry::new(1_672_574_401.5, LogLevel::Error, "failed")
                    .with_location("a.py", "a", 10)
                    .with_context_lines(vec!["x = 1".into()], vec![])],
            ),
        ]);
        build_tree(&root, &[batch])
    }

    fn keys(map: &Map<String, Value>) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_interleaves_logs_and_children_by_time() {
        let projected = project(&sample_tree(), &[], &[LogFeature::Message]);

        assert_eq!(
            keys(&projected),
            vec!["span_id", "func_full_name", "log_0", "child-a", "log_1", "child-b", "log_2"]
        );
        assert_eq!(projected["log_1"]["log message value"], "slow");
        assert_eq!(projected["child-a"]["log_0"]["log message value"], "failed");
    }

    #[test]
    fn test_empty_selection_keeps_identity() {
        let node = SpanNode::new("s", "name", 0.0, 1.0);
        let projected = project(&node, &[], &[]);

        assert_eq!(keys(&projected), vec!["span_id", "func_full_name"]);
        assert_eq!(projected["span_id"], "s");
        assert_eq!(projected["func_full_name"], "name");
    }

    #[test]
    fn test_empty_log_selection_emits_empty_objects() {
        let projected = project(&sample_tree(), &[], &[]);
        assert_eq!(projected["log_0"], Value::Object(Map::new()));
    }

    #[test]
    fn test_full_selection_reproduces_attributes() {
        let selection = FeatureSelection::all();
        let projected = project_selection(&sample_tree(), &selection);

        assert_eq!(projected["span latency"], "10.0");
        assert_eq!(projected["span utc start time"], "2023-01-01 12:00:00+00:00");
        assert_eq!(projected["span utc end time"], "2023-01-01 12:00:10+00:00");

        let log = &projected["child-a"]["log_0"];
        assert_eq!(log["log utc timestamp"], "2023-01-01 12:00:01.500000+00:00");
        assert_eq!(log["log level"], "ERROR");
        assert_eq!(log["file name"], "a.py");
        assert_eq!(log["function name"], "a");
        assert_eq!(log["line number"], "10");
        assert_eq!(log["log line source code"], "");
        assert_eq!(log["lines above log source code"], serde_json::json!(["x = 1"]));
        assert_eq!(log["lines below log source code"], serde_json::json!([]));
    }

    #[test]
    fn test_log_feature_order_follows_selection() {
        let projected = project(
            &sample_tree(),
            &[],
            &[LogFeature::Level, LogFeature::Timestamp],
        );
        let log = projected["log_0"].as_object().unwrap();

        assert_eq!(keys(log), vec!["log level", "log utc timestamp"]);
    }

    #[test]
    fn test_projection_is_deterministic() {
        let tree = sample_tree();
        let selection = FeatureSelection::all();
        let first = serde_json::to_string(&project_selection(&tree, &selection)).unwrap();
        let second = serde_json::to_string(&project_selection(&tree, &selection)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_tie_places_log_before_child() {
        let root = Span::new("root", "main", 0.0, 5.0).with_child(Span::new("c", "c", 1.0, 2.0));
        let batch = LogBatch::from([(
            "root".to_string(),
            vec![LogEntry::new(1.0, LogLevel::Info, "same time")],
        )]);
        let projected = project(&build_tree(&root, &[batch]), &[], &[]);

        assert_eq!(keys(&projected), vec!["span_id", "func_full_name", "log_0", "c"]);
    }

    #[test]
    fn test_colliding_child_ids_are_renamed() {
        let node = SpanNode::new("root", "main", 0.0, 10.0).with_content(
            Vec::new(),
            vec![
                SpanNode::new("dup", "first", 1.0, 2.0),
                SpanNode::new("dup", "second", 3.0, 4.0),
                SpanNode::new("span_id", "named like a key", 5.0, 6.0),
            ],
        );

        let projected = project(&node, &[], &[]);

        assert_eq!(
            keys(&projected),
            vec!["span_id", "func_full_name", "dup", "dup#2", "span_id#2"]
        );
        assert_eq!(projected["span_id"], "root");
        assert_eq!(projected["dup"]["func_full_name"], "first");
        assert_eq!(projected["dup#2"]["func_full_name"], "second");
    }

    #[test]
    fn test_log_key_taken_by_child_is_renamed() {
        let tree = build_tree(
            &Span::new("root", "main", 0.0, 10.0)
                .with_child(Span::new("log_0", "odd name", 1.0, 2.0)),
            &[LogBatch::from([(
                "root".to_string(),
                vec![LogEntry::new(5.0, LogLevel::Info, "after child")],
            )])],
        );

        let projected = project(&tree, &[], &[LogFeature::Message]);

        assert_eq!(keys(&projected), vec!["span_id", "func_full_name", "log_0", "log_0#2"]);
        assert_eq!(projected["log_0"]["func_full_name"], "odd name");
        assert_eq!(projected["log_0#2"]["log message value"], "after child");
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(2.0), "2.0");
        assert_eq!(format_seconds(1.25), "1.25");
        assert_eq!(format_seconds(0.1), "0.1");
    }
}
