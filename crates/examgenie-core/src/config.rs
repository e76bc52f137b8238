//! Configuration loading and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! `RagConfig` is the typed view of the `[rag]` section consumed by the
//! retrieval crates; nothing below reads the environment on its own.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::types::BackendKind;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self::for_env(&env_name, Path::new(".")))
    }

    /// Layer `config.toml`, `config.<env>.toml` (both under `dir`) and `APP_*`
    /// environment variables. Nested keys use `__`, e.g.
    /// `APP_RAG__EXTERNAL__API_KEY`.
    pub fn for_env(env_name: &str, dir: &Path) -> Self {
        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment }
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::config(format!("Failed to get '{}': {}", key, e)))
    }

    /// The `rag` section, with defaults for everything left unset.
    pub fn rag(&self) -> Result<RagConfig> {
        if !self.figment.contains("rag") {
            return Ok(RagConfig::default());
        }
        self.get("rag")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub backend: BackendKind,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub index_dir: String,
    pub rebuild_index: bool,
    pub top_k: usize,
    pub external: ExternalConfig,
    pub local: LocalConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::External,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            index_dir: ".examgenie_db".to_string(),
            rebuild_index: false,
            top_k: 3,
            external: ExternalConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl RagConfig {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig { chunk_size: self.chunk_size, overlap: self.chunk_overlap }
    }

    pub fn index_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.index_dir)
    }

    /// Apply an `EMBEDDING_MODEL`-style name: `sentence-transformers/...`
    /// selects the local backend, anything else is an external model id.
    pub fn apply_embedding_model(&mut self, name: &str) {
        match name.strip_prefix("sentence-transformers/") {
            Some(_) => self.backend = BackendKind::Local,
            None => {
                self.backend = BackendKind::External;
                self.external.model = name.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking().validate()?;
        if self.top_k == 0 {
            return Err(Error::config("top_k must be positive"));
        }
        self.local.validate()?;
        if self.backend == BackendKind::External {
            self.external.validate()?;
        }
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Requested output dimensionality; the model's native size when unset.
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            model: "openai/text-embedding-3-large".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            dimensions: None,
            batch_size: 100,
            max_attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for ExternalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("dimensions", &self.dimensions)
            .field("batch_size", &self.batch_size)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_ms", &self.backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ExternalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(Error::config("external embedding backend selected but no API key configured"));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config("external embedding model must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("external batch_size must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("external max_attempts must be at least 1"));
        }
        if self.dimensions == Some(0) {
            return Err(Error::config("external dimensions must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalModel {
    /// BGE-M3 weights loaded from `model_dir`.
    BgeM3,
    /// Feature-hashing model, no weights needed.
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub model: LocalModel,
    pub model_dir: Option<String>,
    pub hashing_dim: usize,
    pub batch_size: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { model: LocalModel::BgeM3, model_dir: None, hashing_dim: 384, batch_size: 32 }
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("local batch_size must be positive"));
        }
        if self.model == LocalModel::Hashing && self.hashing_dim == 0 {
            return Err(Error::config("local hashing_dim must be positive"));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
