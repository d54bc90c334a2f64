#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Represents a chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The content text
    pub content: String,
    /// The index of this chunk within the document
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
    /// Embed all rows of a CSV file as one document instead of one per row
    pub concat_csv_rows: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            concat_csv_rows: false,
        }
    }
}

/// Split `text` into overlapping chunks no longer than `config.chunk_size` characters.
///
/// Whitespace-only input yields no chunks.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<ContentChunk>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chunk_config = ChunkConfig::new(config.chunk_size)
        .with_overlap(config.chunk_overlap)
        .with_context(|| {
            format!(
                "Invalid chunk overlap {} for chunk size {}",
                config.chunk_overlap, config.chunk_size
            )
        })?;
    let splitter = TextSplitter::new(chunk_config);

    let chunks: Vec<ContentChunk> = splitter
        .chunks(text)
        .filter(|chunk| !chunk.trim().is_empty())
        .enumerate()
        .map(|(chunk_index, chunk)| ContentChunk {
            content: chunk.to_string(),
            chunk_index,
            token_count: estimate_token_count(chunk),
        })
        .collect();

    debug!(
        "Chunked {} characters into {} chunks (avg {} tokens)",
        text.len(),
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
