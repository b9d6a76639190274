//! Integration tests for context assembly.
//!
//! These tests run the whole path from flat span records and log batches to
//! chunked fragments, and check the properties every fragment set must hold.

use context::chunk::{chunk_text, PARENT_CONTEXT_KEY};
use context::config::{ChunkConfig, SemanticChunkConfig};
use context::feature::{FeatureOp, FeatureSelection, LogFeature};
use context::filter::{LogFilter, LogPredicate};
use context::hierarchy::{build_span_hierarchy, SpanRecord, SpanReference};
use context::models::{LogEntry, LogLevel, Span};
use context::pipeline::{build_context, ContextRequest};
use context::projector::LOG_KEY_PREFIX;
use context::tree::{build_tree, LogBatch, SpanNode};
use serde_json::Value;

/// Deterministic generator for varied trees.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

fn random_tree(rng: &mut Lcg) -> (Span, LogBatch) {
    fn grow(rng: &mut Lcg, id: String, start: f64, depth: u32, logs: &mut LogBatch) -> Span {
        let end = start + 10.0;
        let mut span = Span::new(id.clone(), format!("fn_{id}"), start, end);

        let levels = [LogLevel::Debug, LogLevel::Info, LogLevel::Error];
        let count = rng.next(5);
        let entries = (0..count)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let time = start + rng.next(100) as f64 / 10.0;
                let level = levels[usize::try_from(rng.next(3)).unwrap()];
                LogEntry::new(time, level, format!("msg-{id}-{i}"))
                    .with_location("app.py", format!("fn_{id}"), 10 + u32::try_from(i).unwrap())
            })
            .collect();
        logs.insert(id.clone(), entries);

        if depth < 3 {
            for c in 0..rng.next(4) {
                #[allow(clippy::cast_precision_loss)]
                let child_start = start + rng.next(100) as f64 / 10.0;
                let child = grow(rng, format!("{id}.{c}"), child_start, depth + 1, logs);
                span = span.with_child(child.with_parent(id.clone()));
            }
        }
        span
    }

    let mut logs = LogBatch::new();
    let root = grow(rng, "r".to_string(), 1_700_000_000.0, 0, &mut logs);
    (root, logs)
}

/// (owning span, message) pairs in document order, skipping parent headers.
fn collect_logs(value: &Value, owner: Option<&str>, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            let id = map.get("span_id").and_then(Value::as_str).or(owner);
            for (key, v) in map {
                if key == PARENT_CONTEXT_KEY {
                    continue;
                }
                if key.starts_with(LOG_KEY_PREFIX) {
                    let message = v["log message value"].as_str().unwrap().to_string();
                    out.push((id.unwrap().to_string(), message));
                } else {
                    collect_logs(v, id, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_logs(item, owner, out);
            }
        }
        _ => {}
    }
}

fn tree_logs(node: &SpanNode, out: &mut Vec<(String, String)>) {
    for log in &node.logs {
        out.push((node.span_id.clone(), log.message.clone()));
    }
    for child in &node.children {
        tree_logs(child, out);
    }
}

fn top_level_log_count(value: &Value) -> usize {
    value
        .as_object()
        .map_or(0, |map| map.keys().filter(|k| k.starts_with(LOG_KEY_PREFIX)).count())
}

fn semantic(text: &str, chunk_size: usize) -> Vec<String> {
    chunk_text(text, &ChunkConfig::semantic(SemanticChunkConfig::new(chunk_size)))
        .unwrap()
        .collect()
}

fn render(root: &Span, logs: &LogBatch) -> String {
    build_context(root, std::slice::from_ref(logs), &ContextRequest::new())
        .unwrap()
        .text
}

#[test]
fn test_fitting_tree_yields_single_identical_fragment() {
    let mut rng = Lcg(7);
    for _ in 0..10 {
        let (root, logs) = random_tree(&mut rng);
        let text = render(&root, &logs);
        let fragments = semantic(&text, text.chars().count());
        assert_eq!(fragments, vec![text]);
    }
}

#[test]
fn test_fragments_preserve_log_multiset_and_budget() {
    let mut rng = Lcg(42);
    for _ in 0..25 {
        let (root, logs) = random_tree(&mut rng);
        let text = render(&root, &logs);
        let tree = build_tree(&root, std::slice::from_ref(&logs));

        let mut expected = Vec::new();
        tree_logs(&tree, &mut expected);
        expected.sort();

        for chunk_size in [800, 1_500, 4_000] {
            let fragments = semantic(&text, chunk_size);
            let mut recovered = Vec::new();

            for fragment in &fragments {
                let value: Value = serde_json::from_str(fragment).unwrap();
                if fragment.chars().count() > chunk_size {
                    assert_eq!(top_level_log_count(&value), 1, "oversized fragment: {fragment}");
                }
                collect_logs(&value, None, &mut recovered);
            }

            recovered.sort();
            assert_eq!(recovered, expected, "chunk size {chunk_size}");
        }
    }
}

#[test]
fn test_scenario_root_with_two_children() {
    let root = Span::new("root", "service.handle", 0.0, 10.0)
        .with_child(Span::new("a", "service.load", 1.0, 4.0).with_parent("root"))
        .with_child(Span::new("b", "service.save", 5.0, 9.0).with_parent("root"));
    let logs = LogBatch::from([
        (
            "root".to_string(),
            vec![
                LogEntry::new(0.5, LogLevel::Info, "request received"),
                LogEntry::new(9.5, LogLevel::Info, "request done"),
            ],
        ),
        (
            "a".to_string(),
            vec![
                LogEntry::new(2.0, LogLevel::Debug, "loading rows"),
                LogEntry::new(3.0, LogLevel::Warning, "slow load"),
            ],
        ),
        (
            "b".to_string(),
            vec![LogEntry::new(6.0, LogLevel::Error, "save failed")],
        ),
    ]);
    let text = render(&root, &logs);
    let fragments = semantic(&text, text.chars().count() - 1);

    assert!(fragments.len() >= 2);
    let mut recovered = Vec::new();
    for fragment in &fragments {
        let value: Value = serde_json::from_str(fragment).unwrap();
        collect_logs(&value, None, &mut recovered);
    }
    assert_eq!(recovered.len(), 5);

    let messages_of = |span: &str| -> Vec<String> {
        recovered
            .iter()
            .filter(|(owner, _)| owner.as_str() == span)
            .map(|(_, m)| m.clone())
            .collect()
    };
    assert_eq!(messages_of("root"), vec!["request received", "request done"]);
    assert_eq!(messages_of("a"), vec!["loading rows", "slow load"]);
    assert_eq!(messages_of("b"), vec!["save failed"]);
}

#[test]
fn test_scenario_single_span_many_logs() {
    let root = Span::new("only", "batch.run", 0.0, 100.0);
    let entries: Vec<LogEntry> = (0..20)
        .map(|i| LogEntry::new(f64::from(i), LogLevel::Info, format!("step {i:02}")))
        .collect();
    let logs = LogBatch::from([("only".to_string(), entries)]);
    let text = render(&root, &logs);

    let fragments = semantic(&text, 600);
    assert!(fragments.len() > 1);

    let mut next = 0;
    for fragment in &fragments {
        let value: Value = serde_json::from_str(fragment).unwrap();
        assert_eq!(value["span_id"], "only");
        assert_eq!(value["func_full_name"], "batch.run");
        assert!(value.get("span latency").is_some());
        for (key, log) in value.as_object().unwrap() {
            if key.starts_with(LOG_KEY_PREFIX) {
                assert_eq!(log["log message value"], format!("step {next:02}"));
                next += 1;
            }
        }
    }
    assert_eq!(next, 20);
}

#[test]
fn test_scenario_filter_error_logs() {
    let root = Span::new("root", "main", 0.0, 10.0)
        .with_child(Span::new("quiet", "idle", 1.0, 2.0).with_parent("root"))
        .with_child(
            Span::new("busy", "work", 3.0, 8.0)
                .with_parent("root")
                .with_child(Span::new("deep", "step", 4.0, 5.0).with_parent("busy")),
        );
    let logs = LogBatch::from([
        (
            "root".to_string(),
            vec![LogEntry::new(0.5, LogLevel::Info, "hello")],
        ),
        (
            "quiet".to_string(),
            vec![LogEntry::new(1.5, LogLevel::Debug, "tick")],
        ),
        (
            "deep".to_string(),
            vec![
                LogEntry::new(4.2, LogLevel::Error, "broken"),
                LogEntry::new(4.4, LogLevel::Info, "retrying"),
            ],
        ),
    ]);
    let tree = build_tree(&root, &[logs]);
    let filter = LogFilter::new(vec![LogPredicate::new(
        LogFeature::Level,
        FeatureOp::Equal,
        "ERROR",
    )]);

    let filtered = filter.apply(&tree);

    assert!(filtered.logs.is_empty());
    assert_eq!(filtered.children.len(), 1);
    assert_eq!(filtered.children[0].span_id, "busy");
    assert_eq!(filtered.children[0].children[0].span_id, "deep");
    assert_eq!(filtered.children[0].children[0].logs.len(), 1);
    assert_eq!(filtered.children[0].children[0].logs[0].message, "broken");
}

#[test]
fn test_scenario_dangling_parent_promoted() {
    let records = vec![
        SpanRecord::new(Span::new("root", "main", 0.0, 10.0)),
        SpanRecord::new(Span::new("a", "a", 1.0, 3.0)).with_reference(SpanReference::child_of("root")),
        SpanRecord::new(Span::new("b", "b", 4.0, 6.0)).with_reference(SpanReference::child_of("root")),
        SpanRecord::new(Span::new("c", "c", 1.5, 2.0)).with_reference(SpanReference::child_of("a")),
        SpanRecord::new(Span::new("orphan", "lost", 2.0, 2.5).with_parent("missing")),
    ];

    let roots = build_span_hierarchy(records);

    assert_eq!(roots.len(), 2);
    let root = roots.iter().find(|s| s.id == "root").unwrap();
    let orphan = roots.iter().find(|s| s.id == "orphan").unwrap();
    assert!(orphan.spans.is_empty());
    assert_eq!(orphan.parent_id.as_deref(), Some("missing"));

    let child_ids: Vec<&str> = root.spans.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(child_ids, vec!["a", "b"]);
    assert_eq!(root.spans[0].spans[0].id, "c");
    assert_eq!(root.spans[0].spans[0].parent_id.as_deref(), Some("a"));
    assert!(root.spans[1].spans.is_empty());
}

#[test]
fn test_filter_is_idempotent() {
    let mut rng = Lcg(3);
    let filters = [
        LogFilter::new(vec![LogPredicate::new(LogFeature::Level, FeatureOp::Equal, "error")]),
        LogFilter::new(vec![LogPredicate::new(LogFeature::Message, FeatureOp::Contains, "-1")]),
        LogFilter::new(vec![
            LogPredicate::new(LogFeature::Level, FeatureOp::NotEqual, "debug"),
            LogPredicate::new(LogFeature::FileName, FeatureOp::Equal, "APP.PY"),
        ]),
    ];

    for _ in 0..10 {
        let (root, logs) = random_tree(&mut rng);
        let tree = build_tree(&root, &[logs]);
        for filter in &filters {
            let once = filter.apply(&tree);
            assert_eq!(filter.apply(&once), once);
        }
    }
}

#[test]
fn test_tree_is_time_ordered() {
    fn check(node: &SpanNode) {
        assert!(node.logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(node.children.windows(2).all(|w| w[0].start_time <= w[1].start_time));
        node.children.iter().for_each(check);
    }

    let mut rng = Lcg(11);
    for _ in 0..10 {
        let (root, logs) = random_tree(&mut rng);
        check(&build_tree(&root, &[logs]));
    }
}

#[test]
fn test_empty_selection_still_names_every_span() {
    let mut rng = Lcg(5);
    let (root, logs) = random_tree(&mut rng);
    let request = ContextRequest::new().with_selection(FeatureSelection::empty());
    let rendered = build_context(&root, &[logs], &request).unwrap();

    fn check(value: &Value) {
        let map = value.as_object().unwrap();
        assert!(map.contains_key("span_id"));
        assert!(map.contains_key("func_full_name"));
        for (key, child) in map {
            if key.starts_with(LOG_KEY_PREFIX) {
                assert_eq!(child, &Value::Object(serde_json::Map::new()));
            } else if child.is_object() {
                check(child);
            }
        }
    }
    check(&serde_json::from_str(&rendered.text).unwrap());
}

#[test]
fn test_split_children_name_their_parent() {
    let mut root = Span::new("root", "main", 0.0, 100.0);
    let mut entries = LogBatch::new();
    for c in 0..4 {
        let id = format!("child-{c}");
        let start = f64::from(c);
        root = root.with_child(Span::new(id.clone(), "worker", start, start + 1.0).with_parent("root"));
        let logs = (0..6)
            .map(|i| LogEntry::new(start + f64::from(i) / 10.0, LogLevel::Info, format!("work {c}.{i}")))
            .collect();
        entries.insert(id, logs);
    }
    let text = render(&root, &entries);
    let fragments = semantic(&text, 1_200);

    for fragment in &fragments {
        let value: Value = serde_json::from_str(fragment).unwrap();
        if value["span_id"] != "root" {
            assert_eq!(value[PARENT_CONTEXT_KEY]["span_id"], "root");
            assert_eq!(value[PARENT_CONTEXT_KEY]["func_full_name"], "main");
        }
    }
}

#[test]
fn test_deep_span_chain_chunks() {
    let mut span = Span::new("s130", "recurse", 130.0, 131.0);
    for depth in (0..130).rev() {
        let id = format!("s{depth}");
        span = Span::new(id.clone(), "recurse", f64::from(depth), 200.0).with_child(span.with_parent(id));
    }
    let logs = LogBatch::from([(
        "s130".to_string(),
        vec![LogEntry::new(130.5, LogLevel::Error, "stack exhausted")],
    )]);
    let request = ContextRequest::new()
        .with_chunk_config(ChunkConfig::semantic(SemanticChunkConfig::new(2_000)));

    let rendered = build_context(&span, &[logs], &request).unwrap();
    let fragments: Vec<String> = rendered.chunks().unwrap().collect();

    assert!(fragments.len() > 1);
    let mut recovered = Vec::new();
    for fragment in &fragments {
        let value: Value = serde_json::from_str(fragment).unwrap();
        collect_logs(&value, None, &mut recovered);
    }
    assert_eq!(recovered, vec![("s130".to_string(), "stack exhausted".to_string())]);
}
