use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use examgenie_core::error::Result;
use examgenie_core::traits::Embedder;
use examgenie_core::types::BackendKind;

/// Feature-hashing bag-of-words embedder: every lowercased alphanumeric token
/// lands in a bucket chosen by its xxhash, and the vector is L2-normalised.
/// Needs no model files and is fully deterministic.
pub struct HashingEmbedder {
    dim: usize,
    batch_size: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, batch_size: 256, id: format!("local:hashing:d{}", dim) }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            // High bit picks the sign so unrelated tokens tend to cancel.
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v { *x /= norm; }
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn backend_id(&self) -> &str { &self.id }
    fn kind(&self) -> BackendKind { BackendKind::Local }
    fn dim(&self) -> usize { self.dim }
    fn max_batch(&self) -> usize { self.batch_size }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
