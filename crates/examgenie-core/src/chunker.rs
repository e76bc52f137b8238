//! Fixed-size overlapping character windows over document text, plus a
//! loader for pre-extracted `.txt` documents.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, overlap: DEFAULT_CHUNK_OVERLAP }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self { chunk_size, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be positive"));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunk overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Split `document` into windows of `chunk_size` characters whose starts are
/// `chunk_size - overlap` apart, for every start inside the text. Windows
/// near the end are truncated, so the last ones may be shorter than
/// `chunk_size`.
pub fn chunk(document: &Document, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(chunk_with(document, &config))
}

pub fn chunk_with(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let text = document.text.as_str();
    // Byte position of every char boundary, including the end of the text.
    let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let total_chars = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total_chars {
        let end = (start + config.chunk_size).min(total_chars);
        let chunk_index = chunks.len();
        chunks.push(Chunk {
            id: format!("{}_{}", document.id, chunk_index),
            doc_id: document.id.clone(),
            chunk_index,
            start,
            end,
            text: text[boundaries[start]..boundaries[end]].to_string(),
        });
        start += config.step();
    }
    debug!(doc_id = %document.id, chars = total_chars, chunks = chunks.len(), "chunked document");
    chunks
}

/// Chunk every document, in iteration order.
pub fn chunk_documents(documents: &[Document], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;
    Ok(documents.iter().flat_map(|d| chunk_with(d, config)).collect())
}

/// Read every `.txt` file under `dir` (recursively, sorted by path) as a
/// document whose id is the path relative to `dir`.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        return Err(Error::config(format!("context directory not found: {}", dir.display())));
    }
    let files = list_txt_files(dir);
    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        let text = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => String::from_utf8_lossy(&fs::read(path)?).to_string(),
        };
        let id = path.strip_prefix(dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        documents.push(Document { id, text });
    }
    info!(dir = %dir.display(), documents = documents.len(), "loaded context documents");
    Ok(documents)
}

fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
        .map(|e| e.path().to_path_buf())
        .collect();
    txt_files.sort();
    txt_files
}
