//! Content fingerprint of a document set, used to detect a stale index.

use crate::chunker::ChunkingConfig;
use crate::types::Document;

/// blake3 over each document's id and text in iteration order, plus the
/// chunking parameters. Reordering the documents changes the fingerprint.
pub fn fingerprint(documents: &[Document], chunking: &ChunkingConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"examgenie-docset-v1");
    hasher.update(&(chunking.chunk_size as u64).to_le_bytes());
    hasher.update(&(chunking.overlap as u64).to_le_bytes());
    hasher.update(&(documents.len() as u64).to_le_bytes());
    for doc in documents {
        // Length prefixes keep ("ab","c") and ("a","bc") apart.
        hasher.update(&(doc.id.len() as u64).to_le_bytes());
        hasher.update(doc.id.as_bytes());
        hasher.update(&(doc.text.len() as u64).to_le_bytes());
        hasher.update(doc.text.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_between_id_and_text_matter() {
        let cfg = ChunkingConfig::default();
        let a = fingerprint(&[Document::new("ab", "c")], &cfg);
        let b = fingerprint(&[Document::new("a", "bc")], &cfg);
        assert_ne!(a, b);
    }
}
