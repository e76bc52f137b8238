//! On-disk layout of a vector index:
//!
//! ```text
//! <root>/CURRENT              name of the active generation
//! <root>/gen-<ulid>/manifest.json
//! <root>/gen-<ulid>/entries.cbor
//! ```
//!
//! A generation is written completely before `CURRENT` is replaced by an
//! atomic rename, so readers see either the old index or the new one.
//! Only one writer per root is supported.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use examgenie_core::error::{Error, Result};
use examgenie_core::types::{IndexEntry, IndexManifest, MANIFEST_FORMAT_VERSION};

pub const CURRENT_FILE: &str = "CURRENT";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENTRIES_FILE: &str = "entries.cbor";
const GENERATION_PREFIX: &str = "gen-";

fn corrupt(what: impl std::fmt::Display) -> Error {
    Error::IndexCorruption(what.to_string())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}

fn sync_dir(dir: &Path) {
    // Not supported everywhere (e.g. Windows); the rename is still atomic.
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory fsync skipped");
    }
}

/// Write a new generation and make it current. Returns the generation name.
pub fn write_generation(root: &Path, manifest: &IndexManifest, entries: &[IndexEntry]) -> Result<String> {
    fs::create_dir_all(root)?;
    let generation = format!("{}{}", GENERATION_PREFIX, ulid::Ulid::new());
    let gen_dir = root.join(&generation);
    fs::create_dir(&gen_dir)?;

    let entries_bytes = serde_cbor::to_vec(&entries).map_err(|e| Error::Io(std::io::Error::other(e)))?;
    write_synced(&gen_dir.join(ENTRIES_FILE), &entries_bytes)?;
    let manifest_bytes = serde_json::to_vec_pretty(manifest).map_err(|e| Error::Io(std::io::Error::other(e)))?;
    write_synced(&gen_dir.join(MANIFEST_FILE), &manifest_bytes)?;
    sync_dir(&gen_dir);

    let mut pointer = tempfile::NamedTempFile::new_in(root)?;
    pointer.write_all(generation.as_bytes())?;
    pointer.as_file().sync_all()?;
    pointer.persist(root.join(CURRENT_FILE)).map_err(|e| Error::Io(e.error))?;
    sync_dir(root);

    remove_stale_generations(root, &generation);
    Ok(generation)
}

fn remove_stale_generations(root: &Path, keep: &str) {
    let Ok(dir) = fs::read_dir(root) else { return };
    for entry in dir.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(GENERATION_PREFIX) && name != keep {
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                warn!(generation = %name, error = %e, "could not remove stale index generation");
            }
        }
    }
}

/// Path of the generation `CURRENT` points at, `None` if there is no index.
pub fn current_generation(root: &Path) -> Result<Option<PathBuf>> {
    let pointer = root.join(CURRENT_FILE);
    let name = match fs::read_to_string(&pointer) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(corrupt(format!("unreadable {}: {}", pointer.display(), e))),
    };
    if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
        return Err(corrupt(format!("CURRENT points at '{}'", name)));
    }
    Ok(Some(root.join(name)))
}

/// Read and cross-check the current generation. Missing index is `Ok(None)`;
/// anything unreadable or inconsistent is `Err(IndexCorruption)`.
pub fn read_current(root: &Path) -> Result<Option<(IndexManifest, Vec<IndexEntry>)>> {
    let Some(gen_dir) = current_generation(root)? else { return Ok(None) };

    let manifest_bytes = fs::read(gen_dir.join(MANIFEST_FILE)).map_err(|e| corrupt(format!("manifest: {}", e)))?;
    let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| corrupt(format!("manifest: {}", e)))?;
    if manifest.format_version != MANIFEST_FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {}, expected {}",
            manifest.format_version, MANIFEST_FORMAT_VERSION
        )));
    }

    let entries_bytes = fs::read(gen_dir.join(ENTRIES_FILE)).map_err(|e| corrupt(format!("entries: {}", e)))?;
    let entries: Vec<IndexEntry> = serde_cbor::from_slice(&entries_bytes).map_err(|e| corrupt(format!("entries: {}", e)))?;
    if entries.len() != manifest.chunk_count {
        return Err(corrupt(format!("{} entries, manifest says {}", entries.len(), manifest.chunk_count)));
    }
    if let Some(bad) = entries.iter().find(|e| e.vector.len() != manifest.dim) {
        return Err(corrupt(format!("entry {} has {} dimensions, manifest says {}", bad.chunk.id, bad.vector.len(), manifest.dim)));
    }
    Ok(Some((manifest, entries)))
}
