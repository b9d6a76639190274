//! Fixed-width overlapping windows.
//!
//! Windows of `chunk_size` characters start every `chunk_size - overlap_size`
//! characters until the start passes the end of the text. The last windows
//! may be shorter than `chunk_size`. Structure is ignored; this is the coarse
//! fallback when order matters but boundaries do not.

use super::ChunkError;
use crate::config::SequentialChunkConfig;

/// Iterator over overlapping windows of a text.
#[derive(Debug, Clone)]
pub struct SequentialChunks<'a> {
    text: &'a str,
    chunk_size: usize,
    step: usize,
    start: usize,
}

/// Starts windowing `text`.
///
/// # Errors
///
/// Returns [`ChunkError::Config`] if the chunk size is zero or the overlap is
/// not smaller than the chunk size.
///
/// # Example
///
/// ```
/// use context::chunk::sequential_chunks;
/// use context::config::SequentialChunkConfig;
///
/// let chunks: Vec<String> =
///     sequential_chunks("abcdefghij", &SequentialChunkConfig::new(4, 1))
///         .unwrap()
///         .collect();
/// assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
/// ```
pub fn sequential_chunks<'a>(
    text: &'a str,
    config: &SequentialChunkConfig,
) -> Result<SequentialChunks<'a>, ChunkError> {
    config.validate_config()?;
    Ok(SequentialChunks {
        text,
        chunk_size: config.chunk_size,
        step: config.chunk_size - config.overlap_size,
        start: 0,
    })
}

impl Iterator for SequentialChunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start >= self.text.len() {
            return None;
        }

        let end = advance(self.text, self.start, self.chunk_size);
        let chunk = self.text[self.start..end].to_string();
        self.start = advance(self.text, self.start, self.step);
        Some(chunk)
    }
}

/// Byte offset `chars` characters after byte offset `from`, clamped to the end.
fn advance(text: &str, from: usize, chars: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| from + offset)
}
