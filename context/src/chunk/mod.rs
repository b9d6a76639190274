//! Splitting serialized trees into bounded fragments.
//!
//! Two independent strategies are provided:
//! - [`sequential`] slides a fixed-width, overlapping window over raw text.
//! - [`semantic`] bin-packs the parsed span tree, keeping parent/child
//!   lineage visible in every fragment.
//!
//! Both are lazy iterators: fragments are produced as they are consumed and
//! dropping the iterator is all it takes to stop. Budgets count characters.

pub mod semantic;
pub mod sequential;

pub use semantic::{semantic_chunks, SemanticChunks, PARENT_CONTEXT_KEY};
pub use sequential::{sequential_chunks, SequentialChunks};

use crate::config::{ChunkConfig, ChunkStrategy, ConfigError};
use thiserror::Error;

/// Errors raised when starting a chunker.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The chunker configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The serialized tree is not valid JSON.
    #[error("Failed to parse serialized tree: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Fragments produced by either strategy.
#[derive(Debug)]
pub enum Chunks<'a> {
    /// Overlapping windows.
    Sequential(SequentialChunks<'a>),
    /// Hierarchy-aware fragments.
    Semantic(SemanticChunks),
}

impl Iterator for Chunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Sequential(chunks) => chunks.next(),
            Self::Semantic(chunks) => chunks.next(),
        }
    }
}

/// Starts the strategy selected by `config` over `text`.
///
/// # Errors
///
/// Returns an error if the selected strategy's settings are invalid, or if
/// the semantic strategy is selected and `text` is not valid JSON.
pub fn chunk_text<'a>(text: &'a str, config: &ChunkConfig) -> Result<Chunks<'a>, ChunkError> {
    match config.strategy {
        ChunkStrategy::Sequential => Ok(Chunks::Sequential(sequential_chunks(
            text,
            &config.sequential,
        )?)),
        ChunkStrategy::Semantic => Ok(Chunks::Semantic(semantic_chunks(text, &config.semantic)?)),
    }
}

/// Length of `text` in characters.
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}
