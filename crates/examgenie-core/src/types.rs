//! Domain types shared by the chunker, the embedders, the index and the
//! retrieval service.

use serde::{Deserialize, Serialize};

pub type ChunkId = String;
pub type EmbeddingVector = Vec<f32>;

/// Extracted text of one source document. The id is usually the file name
/// relative to the context directory and is what citations show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}

/// A contiguous passage of one document, the unit of indexing.
///
/// - `id`: `"{doc_id}_{chunk_index}"`, unique within a document set
/// - `start`/`end`: character offsets into the source text, `end` exclusive
/// - `chunk_index`: position of the chunk within its document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Chunk {
    /// Human-readable source reference, e.g. `algebra.txt @ 1600..2600`.
    pub fn citation(&self) -> String {
        format!("{} @ {}..{}", self.doc_id, self.start, self.end)
    }
}

/// Chunk plus its vector; what the index stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: EmbeddingVector,
}

/// Which family of embedding backend produced a set of vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    External,
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::External => f.write_str("external"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Provenance of a persisted index.
///
/// An index is reusable only when `fingerprint`, `backend` and `model_id`
/// all match what the current run would build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub backend: BackendKind,
    pub model_id: String,
    pub dim: usize,
    pub fingerprint: String,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub built_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl IndexManifest {
    pub fn new(backend: BackendKind, model_id: impl Into<String>, dim: usize, fingerprint: impl Into<String>) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            backend,
            model_id: model_id.into(),
            dim,
            fingerprint: fingerprint.into(),
            chunk_count: 0,
            built_at: None,
        }
    }

    /// Same document set, same embedding space.
    pub fn matches(&self, other: &IndexManifest) -> bool {
        self.fingerprint == other.fingerprint && self.backend == other.backend && self.model_id == other.model_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Hits for one query, best first. Never longer than the requested `k`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RetrievalHit> {
        self.hits.iter()
    }

    /// Passages formatted for an explanation prompt, each preceded by its
    /// citation and separated by blank lines.
    pub fn to_context(&self) -> String {
        self.hits
            .iter()
            .map(|h| format!("[{}]\n{}", h.chunk.citation(), h.chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl IntoIterator for RetrievalResult {
    type Item = RetrievalHit;
    type IntoIter = std::vec::IntoIter<RetrievalHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}
