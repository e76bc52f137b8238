//! Glue between chunking, embedding and the vector index.
//!
//! A service is built once per run: [`RetrievalService::ensure_index`] makes
//! sure an index for the document set exists (reusing the persisted one when
//! its provenance matches), then [`RetrievalService::retrieve`] answers topic
//! queries against it.

use std::path::Path;
use std::sync::mpsc;

use tracing::{debug, info};

use examgenie_core::chunker::{chunk_documents, ChunkingConfig};
use examgenie_core::config::RagConfig;
use examgenie_core::error::{Error, Result};
use examgenie_core::fingerprint::fingerprint;
use examgenie_core::types::{Document, IndexEntry, IndexManifest, RetrievalResult};
use examgenie_embed::{ActiveBackend, EmbedderNotice, EmbeddingDispatcher};
use examgenie_index::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// Persisted index matched and was loaded.
    Reused { chunks: usize },
    /// Index was (re)built from the documents.
    Rebuilt { chunks: usize },
}

pub struct RetrievalService {
    chunking: ChunkingConfig,
    top_k: usize,
    rebuild_on_start: bool,
    dispatcher: EmbeddingDispatcher,
    index: VectorIndex,
    ready: bool,
    ensured: usize,
    rebuilds: usize,
}

impl RetrievalService {
    pub fn new(config: &RagConfig, dispatcher: EmbeddingDispatcher, index: VectorIndex) -> Result<Self> {
        let chunking = config.chunking();
        chunking.validate()?;
        Ok(Self {
            chunking,
            top_k: config.top_k.max(1),
            rebuild_on_start: config.rebuild_index,
            dispatcher,
            index,
            ready: false,
            ensured: 0,
            rebuilds: 0,
        })
    }

    /// Dispatcher and index as described by `config`; relative paths resolve
    /// against `base`.
    pub fn from_config(config: &RagConfig, base: &Path) -> Result<Self> {
        let dispatcher = EmbeddingDispatcher::from_config(config, base)?;
        let index = VectorIndex::open(config.index_path(base));
        Self::new(config, dispatcher, index)
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<EmbedderNotice> {
        self.dispatcher.subscribe()
    }

    pub fn dispatcher(&self) -> &EmbeddingDispatcher {
        &self.dispatcher
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Backend that would embed the next query.
    pub fn active_backend_id(&mut self) -> Result<String> {
        self.dispatcher.active_backend_id()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Number of builds this service has performed.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    /// Make the index match `documents` and the active embedding backend.
    ///
    /// The `rebuild_index` config flag forces a rebuild on the first call,
    /// `force_rebuild` on this one.
    pub fn ensure_index(&mut self, documents: &[Document], force_rebuild: bool) -> Result<IndexStatus> {
        let forced = force_rebuild || (self.rebuild_on_start && self.ensured == 0);
        self.ensured += 1;
        let fp = fingerprint(documents, &self.chunking);

        if !forced {
            let active = self.dispatcher.active()?;
            let candidate = manifest_for(&active, &fp);
            if self.ready && self.index.is_valid(&candidate) {
                let chunks = self.index.len();
                debug!(chunks, "in-memory vector index is current");
                return Ok(IndexStatus::Reused { chunks });
            }
            match self.index.load() {
                Some(found) if self.index.is_valid(&candidate) => {
                    info!(root = %self.index.root().display(), chunks = found.chunk_count, model = %found.model_id, "reusing vector index");
                    self.ready = true;
                    return Ok(IndexStatus::Reused { chunks: found.chunk_count });
                }
                Some(found) => {
                    info!(
                        stale_model = %found.model_id,
                        model = %candidate.model_id,
                        fingerprint_changed = found.fingerprint != candidate.fingerprint,
                        "vector index out of date, rebuilding"
                    );
                }
                None => info!(root = %self.index.root().display(), "no usable vector index, building"),
            }
        } else {
            info!("index rebuild requested");
        }

        self.rebuild(documents, fp)
    }

    fn rebuild(&mut self, documents: &[Document], fp: String) -> Result<IndexStatus> {
        self.ready = false;
        let chunks = chunk_documents(documents, &self.chunking)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        debug!(documents = documents.len(), chunks = chunks.len(), "embedding chunks");
        let vectors = self.dispatcher.embed(&texts)?;

        // Fallback may have happened during the call; record what produced the vectors.
        let active = self.dispatcher.active()?;
        let manifest = manifest_for(&active, &fp);
        let entries: Vec<IndexEntry> = chunks.into_iter().zip(vectors).map(|(chunk, vector)| IndexEntry { chunk, vector }).collect();
        let count = entries.len();
        self.index.build(entries, manifest)?;

        self.rebuilds += 1;
        self.ready = true;
        Ok(IndexStatus::Rebuilt { chunks: count })
    }

    /// Top `k` chunks for `topic`. Never rebuilds; fails if the query would be
    /// embedded by a different backend than the index was.
    pub fn retrieve(&mut self, topic: &str, k: usize) -> Result<RetrievalResult> {
        if !self.ready {
            return Err(Error::IndexNotReady);
        }
        let query = self.dispatcher.embed(&[topic.to_string()])?;
        let active = self.dispatcher.active()?;
        let manifest = self.index.manifest().ok_or(Error::IndexNotReady)?;
        if active.kind != manifest.backend || active.id != manifest.model_id {
            return Err(Error::BackendMismatch { index: manifest.model_id.clone(), active: active.id });
        }
        let vector = query.into_iter().next().ok_or_else(|| Error::EmbeddingUnavailable("no vector returned for topic".to_string()))?;
        self.index.query(&vector, k)
    }

    /// Passages for an explanation prompt, each under its citation. Empty
    /// when nothing matched.
    pub fn retrieve_context(&mut self, topic: &str, k: usize) -> Result<String> {
        Ok(self.retrieve(topic, k)?.to_context())
    }
}

fn manifest_for(active: &ActiveBackend, fingerprint: &str) -> IndexManifest {
    IndexManifest::new(active.kind, active.id.clone(), active.dim, fingerprint)
}
