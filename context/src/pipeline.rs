//! End-to-end context assembly.
//!
//! [`build_context`] chains the stages a caller otherwise wires by hand:
//! tree building, optional log filtering, feature projection and
//! serialization. The rendered text is then chunked lazily on demand.

use crate::chunk::{chunk_text, ChunkError, Chunks};
use crate::config::ChunkConfig;
use crate::feature::FeatureSelection;
use crate::filter::LogFilter;
use crate::models::Span;
use crate::projector::project_selection;
use crate::tree::{build_tree, LogBatch};
use crate::ContextError;
use serde::{Deserialize, Serialize};

/// Characters per estimated model token.
pub const CHARS_PER_TOKEN: usize = 4;

/// What to include in a rendered context and how to chunk it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextRequest {
    /// Span and log attributes to project.
    #[serde(default)]
    pub selection: FeatureSelection,
    /// Optional log filter applied before projection.
    #[serde(default)]
    pub filter: Option<LogFilter>,
    /// Chunking settings.
    #[serde(default)]
    pub chunk: ChunkConfig,
}

impl ContextRequest {
    /// Creates a request projecting every feature, with no filter and the
    /// default chunking.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the projected features.
    #[must_use]
    pub fn with_selection(mut self, selection: FeatureSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Sets the log filter.
    #[must_use]
    pub fn with_filter(mut self, filter: LogFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the chunking configuration.
    #[must_use]
    pub fn with_chunk_config(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }
}

/// A serialized span tree ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContext {
    /// Pretty-printed projection.
    pub text: String,
    /// Rough model token count, one per [`CHARS_PER_TOKEN`] characters.
    pub estimated_tokens: usize,
    /// Chunking used by [`RenderedContext::chunks`].
    pub chunk_config: ChunkConfig,
}

impl RenderedContext {
    /// Starts chunking the text with the request's configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn chunks(&self) -> Result<Chunks<'_>, ChunkError> {
        chunk_text(&self.text, &self.chunk_config)
    }

    /// Length of the text in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Builds, filters, projects and serializes the tree rooted at `root`.
///
/// # Errors
///
/// Returns [`ContextError::Config`] if the chunk configuration is invalid, and
/// [`ContextError::Serialize`] if the projection cannot be rendered.
///
/// # Example
///
/// ```
/// use context::models::{LogEntry, LogLevel, Span};
/// use context::pipeline::{build_context, ContextRequest};
/// use context::tree::LogBatch;
///
/// let root = Span::new("root", "main", 0.0, 1.0);
/// let logs = LogBatch::from([(
///     "root".to_string(),
///     vec![LogEntry::new(0.5, LogLevel::Error, "boom")],
/// )]);
///
/// let rendered = build_context(&root, &[logs], &ContextRequest::new()).unwrap();
/// assert!(rendered.text.contains("boom"));
/// assert_eq!(rendered.chunks().unwrap().count(), 1);
/// ```
pub fn build_context(
    root: &Span,
    log_batches: &[LogBatch],
    request: &ContextRequest,
) -> Result<RenderedContext, ContextError> {
    request.chunk.validate_config()?;

    let mut tree = build_tree(root, log_batches);
    if let Some(filter) = &request.filter {
        tree = filter.apply(&tree);
    }

    let projected = project_selection(&tree, &request.selection);
    let text = serde_json::to_string_pretty(&projected)?;
    let chars = text.chars().count();
    let estimated_tokens = chars * CHARS_PER_TOKEN;

    tracing::info!(
        span_id = %tree.span_id,
        spans = tree.total_spans(),
        logs = tree.total_logs(),
        chars,
        estimated_tokens,
        "Rendered span tree"
    );

    Ok(RenderedContext {
        text,
        estimated_tokens,
        chunk_config: request.chunk,
    })
}
