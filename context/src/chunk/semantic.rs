//! Hierarchy-aware chunking of a projected span tree.
//!
//! The chunker works on the parsed projection (see [`crate::projector`]), not
//! on raw text. A span object is made of its own data (identifier, name,
//! selected attributes and `log_N` entries) and its children (nested objects
//! that carry a `span_id`). Splitting proceeds top-down:
//!
//! 1. A span that fits the budget is emitted whole.
//! 2. If the span's own data alone exceeds the budget, its logs are cut into
//!    contiguous batches, each repeating the span's metadata, and every child
//!    is split separately.
//! 3. Otherwise children are packed greedily, in order, into a chunk seeded
//!    with the span's own data. When a child does not fit, the chunk so far
//!    is emitted and a new one is seeded with the span's metadata (without
//!    logs, so no log is repeated). A child that does not fit even then is
//!    split on its own.
//!
//! A child split away from its parent carries a `_parent_context` header with
//! the parent's identifier and name. Every log lands in exactly one fragment.
//! A fragment only exceeds the budget when it holds a single log that cannot
//! be divided further.

use super::{char_len, ChunkError};
use crate::config::SemanticChunkConfig;
use crate::projector::{LOG_KEY_PREFIX, SPAN_ID_KEY, SPAN_NAME_KEY};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::ops::Range;

/// Key of the header naming the parent of a split-off child.
pub const PARENT_CONTEXT_KEY: &str = "_parent_context";

type Object = Map<String, Value>;

#[derive(Debug)]
enum Task {
    Emit(String),
    Split { span: Object, parent: Option<Value> },
}

/// Iterator over hierarchy-aware fragments.
///
/// Work is expanded one span at a time as fragments are consumed.
#[derive(Debug)]
pub struct SemanticChunks {
    chunk_size: usize,
    min_chunk_size: usize,
    // Pending work, next item last.
    tasks: Vec<Task>,
}

/// Parses `text` and starts chunking it.
///
/// Text that already fits the budget is yielded unchanged as the only
/// fragment. Otherwise fragments are pretty-printed JSON. A JSON array is
/// treated as a list of sibling spans and batched; any other non-span value
/// is indivisible and yielded whole.
///
/// # Errors
///
/// Returns [`ChunkError::Config`] for an invalid configuration and
/// [`ChunkError::Parse`] if `text` is not valid JSON; nothing is emitted in
/// either case.
///
/// # Example
///
/// ```
/// use context::chunk::semantic_chunks;
/// use context::config::SemanticChunkConfig;
///
/// let text = r#"{"span_id": "root", "func_full_name": "main", "log_0": {"log message value": "hi"}}"#;
/// let chunks: Vec<String> = semantic_chunks(text, &SemanticChunkConfig::new(1_000))
///     .unwrap()
///     .collect();
/// assert_eq!(chunks, vec![text.to_string()]);
/// ```
pub fn semantic_chunks(text: &str, config: &SemanticChunkConfig) -> Result<SemanticChunks, ChunkError> {
    config.validate_config()?;
    let data = parse_tree(text)?;

    let mut chunks = SemanticChunks {
        chunk_size: config.chunk_size,
        min_chunk_size: config.min_chunk_size,
        tasks: Vec::new(),
    };

    if char_len(text) <= config.chunk_size {
        chunks.tasks.push(Task::Emit(text.to_string()));
        return Ok(chunks);
    }

    let planned = match data {
        Value::Object(span) if is_span(&span) => vec![Task::Split { span, parent: None }],
        Value::Array(items) => chunks.plan_span_list(items),
        _ => {
            tracing::warn!(
                size = char_len(text),
                chunk_size = config.chunk_size,
                "Serialized tree is not a span; emitting it whole"
            );
            vec![Task::Emit(text.to_string())]
        }
    };
    chunks.tasks.extend(planned.into_iter().rev());
    Ok(chunks)
}

impl Iterator for SemanticChunks {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Emit(fragment) => return Some(fragment),
                Task::Split { span, parent } => {
                    let planned = self.plan_span(span, parent);
                    self.tasks.extend(planned.into_iter().rev());
                }
            }
        }
        None
    }
}

impl SemanticChunks {
    fn fits(&self, value: &impl serde::Serialize) -> bool {
        rendered_len(value) <= self.chunk_size
    }

    /// Plans the fragments of one span, in emission order.
    fn plan_span(&self, span: Object, parent: Option<Value>) -> Vec<Task> {
        let span = with_parent_context(span, parent);
        if self.fits(&span) {
            return vec![Task::Emit(render(&span))];
        }

        let (own, children) = partition(span);
        let context = parent_context_of(&own);

        if !self.fits(&own) {
            let mut tasks = self.plan_log_batches(&own);
            tasks.extend(children.into_iter().map(|(_, child)| Task::Split {
                span: child,
                parent: Some(context.clone()),
            }));
            return tasks;
        }

        let metadata = without_logs(&own);
        let mut tasks = Vec::new();
        let mut current = own;
        let mut current_is_first = true;
        let mut current_has_children = false;

        for (key, child) in children {
            current.insert(key.clone(), Value::Object(child));
            if self.fits(&current) {
                current_has_children = true;
                continue;
            }
            // The child was inserted last, so removing it keeps key order.
            let Some(Value::Object(child)) = current.remove(&key) else {
                continue;
            };

            if current_is_first || current_has_children {
                tasks.push(Task::Emit(render(&current)));
            }
            current = metadata.clone();
            current_is_first = false;
            current_has_children = false;

            current.insert(key.clone(), Value::Object(child));
            if self.fits(&current) {
                current_has_children = true;
            } else if let Some(Value::Object(child)) = current.remove(&key) {
                tasks.push(Task::Split {
                    span: child,
                    parent: Some(context.clone()),
                });
            }
        }

        if current_is_first || current_has_children {
            tasks.push(Task::Emit(render(&current)));
        }
        tasks
    }

    /// Cuts a span's logs into contiguous batches that each repeat the span's
    /// metadata.
    fn plan_log_batches(&self, own: &Object) -> Vec<Task> {
        let metadata = without_logs(own);
        let logs: Vec<(&String, &Value)> = own.iter().filter(|(key, _)| is_log_key(key)).collect();

        if logs.is_empty() {
            tracing::warn!(
                size = rendered_len(own),
                chunk_size = self.chunk_size,
                "Span metadata exceeds chunk size; emitting it whole"
            );
            return vec![Task::Emit(render(own))];
        }

        let assemble = |range: Range<usize>| -> Object {
            let mut chunk = metadata.clone();
            for &(key, value) in &logs[range] {
                chunk.insert(key.clone(), value.clone());
            }
            chunk
        };

        let mut ranges: Vec<Range<usize>> = Vec::new();
        let mut start = 0;
        let mut chunk = metadata.clone();
        for (i, &(key, value)) in logs.iter().enumerate() {
            chunk.insert(key.clone(), value.clone());
            if i > start && !self.fits(&chunk) {
                ranges.push(start..i);
                start = i;
                chunk = metadata.clone();
                chunk.insert(key.clone(), value.clone());
            }
        }
        ranges.push(start..logs.len());

        self.rebalance_tail(&mut ranges, &assemble);

        ranges
            .into_iter()
            .map(|range| {
                let chunk = assemble(range.clone());
                if range.len() == 1 && !self.fits(&chunk) {
                    tracing::warn!(
                        log = %logs[range.start].0,
                        size = rendered_len(&chunk),
                        chunk_size = self.chunk_size,
                        "Single log exceeds chunk size; emitting it alone"
                    );
                }
                Task::Emit(render(&chunk))
            })
            .collect()
    }

    /// Moves logs from the second-to-last batch into a last batch smaller than
    /// the minimum chunk size, as long as the last batch stays within budget.
    fn rebalance_tail(&self, ranges: &mut [Range<usize>], assemble: &impl Fn(Range<usize>) -> Object) {
        if self.min_chunk_size == 0 || ranges.len() < 2 {
            return;
        }
        let n = ranges.len();
        loop {
            let previous = ranges[n - 2].clone();
            let last = ranges[n - 1].clone();
            if previous.len() <= 1 || rendered_len(&assemble(last.clone())) >= self.min_chunk_size {
                return;
            }
            let grown = previous.end - 1..last.end;
            if !self.fits(&assemble(grown.clone())) {
                return;
            }
            ranges[n - 2] = previous.start..previous.end - 1;
            ranges[n - 1] = grown;
        }
    }

    /// Batches a top-level list of spans into array fragments.
    fn plan_span_list(&self, items: Vec<Value>) -> Vec<Task> {
        let mut tasks = Vec::new();
        let mut batch: Vec<Value> = Vec::new();

        for item in items {
            if !self.fits(&[&item]) {
                if !batch.is_empty() {
                    tasks.push(Task::Emit(render(&batch)));
                    batch.clear();
                }
                match item {
                    Value::Object(span) if is_span(&span) => {
                        tasks.push(Task::Split { span, parent: None });
                    }
                    other => tasks.push(Task::Emit(render(&other))),
                }
                continue;
            }

            batch.push(item);
            if batch.len() > 1 && !self.fits(&batch) {
                if let Some(overflow) = batch.pop() {
                    tasks.push(Task::Emit(render(&batch)));
                    batch = vec![overflow];
                }
            }
        }

        if !batch.is_empty() {
            tasks.push(Task::Emit(render(&batch)));
        }
        tasks
    }
}

/// Parses a serialized tree without a nesting limit; span chains can be
/// deeper than the default of 128.
fn parse_tree(text: &str) -> Result<Value, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    deserializer.disable_recursion_limit();
    let value = Value::deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

fn is_span(object: &Object) -> bool {
    object.contains_key(SPAN_ID_KEY)
}

fn is_log_key(key: &str) -> bool {
    key.starts_with(LOG_KEY_PREFIX)
}

/// Puts the parent header first, ahead of the span's own keys.
fn with_parent_context(span: Object, parent: Option<Value>) -> Object {
    match parent {
        None => span,
        Some(header) => {
            let mut out = Map::with_capacity(span.len() + 1);
            out.insert(PARENT_CONTEXT_KEY.to_string(), header);
            out.extend(span);
            out
        }
    }
}

/// Splits a span into its own entries and its child spans, both in order.
fn partition(span: Object) -> (Object, Vec<(String, Object)>) {
    let mut own = Map::new();
    let mut children = Vec::new();
    for (key, value) in span {
        match value {
            Value::Object(child) if key != PARENT_CONTEXT_KEY && is_span(&child) => {
                children.push((key, child));
            }
            other => {
                own.insert(key, other);
            }
        }
    }
    (own, children)
}

fn without_logs(own: &Object) -> Object {
    own.iter()
        .filter(|(key, _)| !is_log_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn parent_context_of(own: &Object) -> Value {
    let mut header = Map::new();
    header.insert(
        SPAN_ID_KEY.to_string(),
        own.get(SPAN_ID_KEY).cloned().unwrap_or(Value::Null),
    );
    header.insert(
        SPAN_NAME_KEY.to_string(),
        own.get(SPAN_NAME_KEY).cloned().unwrap_or(Value::Null),
    );
    Value::Object(header)
}

fn render(value: &impl serde::Serialize) -> String {
    // JSON values with string keys always serialize.
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn rendered_len(value: &impl serde::Serialize) -> usize {
    char_len(&render(value))
}
