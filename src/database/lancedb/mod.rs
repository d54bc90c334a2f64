// LanceDB vector database module
// Holds the embedded chunks of every processed document


pub mod vector_store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance function the vector index is declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    L2,
    Cosine,
    Dot,
}

impl DistanceMetric {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }
}

impl fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" => Ok(DistanceMetric::Dot),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// `<document_uri>#<chunk_index>`
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Object key of the source document
    pub document_uri: String,
    /// Fingerprint of the document content the chunk was cut from
    pub content_fingerprint: String,
    /// Index of this chunk within the document (for ordering)
    pub chunk_index: u32,
    /// The actual text content of the chunk
    pub content: String,
    /// `URL:` line of the document's metadata header, if any
    pub source_url: Option<String>,
    /// Free-form document metadata (header text and sidecar fields)
    pub document_metadata: Option<String>,
    /// Timestamp when this embedding was created
    pub created_at: String,
}

impl EmbeddingRecord {
    /// Stable vector id for chunk `chunk_index` of `document_uri`
    #[inline]
    pub fn vector_id(document_uri: &str, chunk_index: u32) -> String {
        format!("{document_uri}#{chunk_index}")
    }
}
