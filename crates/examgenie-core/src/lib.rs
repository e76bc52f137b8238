#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunker;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod traits;
pub mod types;

pub use chunker::{chunk, chunk_documents, load_documents, ChunkingConfig};
pub use error::{Error, Result, TransientKind};
pub use fingerprint::fingerprint;
pub use traits::Embedder;
pub use types::{BackendKind, Chunk, Document, EmbeddingVector, IndexEntry, IndexManifest, RetrievalHit, RetrievalResult};
