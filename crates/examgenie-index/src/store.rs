use std::path::{Path, PathBuf};

use tracing::{info, warn};

use examgenie_core::error::{Error, Result};
use examgenie_core::types::{IndexEntry, IndexManifest, RetrievalHit, RetrievalResult};

use crate::persist;
use crate::similarity::{cosine_with_norms, norm};

/// Exact cosine-similarity index over a set of [`IndexEntry`], persisted under
/// one root directory.
///
/// Nothing is read from disk until [`VectorIndex::load`] is called; a fresh
/// instance behaves like an empty index.
pub struct VectorIndex {
    root: PathBuf,
    manifest: Option<IndexManifest>,
    entries: Vec<IndexEntry>,
    norms: Vec<f64>,
}

impl VectorIndex {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), manifest: None, entries: Vec::new(), norms: Vec::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifest of the index currently held in memory.
    pub fn manifest(&self) -> Option<&IndexManifest> {
        self.manifest.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the index with `entries` and persist it.
    ///
    /// Every vector must have `manifest.dim` components. `chunk_count` and
    /// `built_at` are filled in here. On error the previous on-disk index
    /// stays active.
    pub fn build(&mut self, entries: Vec<IndexEntry>, mut manifest: IndexManifest) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != manifest.dim) {
            return Err(Error::DimensionMismatch { expected: manifest.dim, actual: bad.vector.len() });
        }
        manifest.chunk_count = entries.len();
        if manifest.built_at.is_none() {
            manifest.built_at = Some(chrono::Utc::now());
        }

        let generation = persist::write_generation(&self.root, &manifest, &entries)?;
        info!(
            root = %self.root.display(),
            %generation,
            chunks = entries.len(),
            model = %manifest.model_id,
            "vector index written"
        );
        self.install(manifest, entries);
        Ok(())
    }

    /// Load the persisted index, returning its manifest.
    ///
    /// A missing or unreadable index yields `None` and leaves this instance
    /// empty; callers rebuild in that case.
    pub fn load(&mut self) -> Option<IndexManifest> {
        match persist::read_current(&self.root) {
            Ok(Some((manifest, entries))) => {
                info!(root = %self.root.display(), chunks = entries.len(), "vector index loaded");
                self.install(manifest.clone(), entries);
                Some(manifest)
            }
            Ok(None) => {
                self.clear();
                None
            }
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "ignoring unusable vector index");
                self.clear();
                None
            }
        }
    }

    /// Whether the loaded index can serve a run that would build `candidate`.
    pub fn is_valid(&self, candidate: &IndexManifest) -> bool {
        self.manifest.as_ref().is_some_and(|m| m.matches(candidate))
    }

    /// Top `k` entries by cosine similarity to `vector`, best first. Ties keep
    /// insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::config("k must be at least 1"));
        }
        let Some(manifest) = self.manifest.as_ref().filter(|_| !self.entries.is_empty()) else {
            return Ok(RetrievalResult::default());
        };
        if vector.len() != manifest.dim {
            return Err(Error::DimensionMismatch { expected: manifest.dim, actual: vector.len() });
        }

        let query_norm = norm(vector);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (entry, n))| (i, cosine_with_norms(vector, query_norm, &entry.vector, *n)))
            .collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        let hits = scored
            .into_iter()
            .map(|(i, score)| RetrievalHit { chunk: self.entries[i].chunk.clone(), score })
            .collect();
        Ok(RetrievalResult { hits })
    }

    fn install(&mut self, manifest: IndexManifest, entries: Vec<IndexEntry>) {
        self.norms = entries.iter().map(|e| norm(&e.vector)).collect();
        self.entries = entries;
        self.manifest = Some(manifest);
    }

    fn clear(&mut self) {
        self.manifest = None;
        self.entries.clear();
        self.norms.clear();
    }
}
