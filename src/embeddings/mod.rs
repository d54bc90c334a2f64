// Embeddings module
// Text chunking and the embedding service the workers call per document

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;

pub use chunking::{ChunkingConfig, ContentChunk, chunk_text, estimate_token_count};
pub use ollama::OllamaClient;

/// Turns text chunks into vectors. Calls are fallible and independent.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;
}
