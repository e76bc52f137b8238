//! Backend selection with retry, backoff and sticky fallback to the local
//! model.
//!
//! The dispatcher owns the only mutable embedding state of a session: once
//! the external provider has exhausted its attempts, every later call goes to
//! the local backend. A single `embed` call never mixes vectors from both.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use examgenie_core::config::{ExternalConfig, LocalConfig, LocalModel, RagConfig};
use examgenie_core::config::resolve_with_base;
use examgenie_core::error::{Error, Result, TransientKind};
use examgenie_core::traits::Embedder;
use examgenie_core::types::BackendKind;

use crate::bge::{resolve_model_dir, BgeM3Embedder};
use crate::hashing::HashingEmbedder;
use crate::remote::RemoteEmbedder;

/// Out-of-band events for the caller. Fallback is not an error: the call
/// that triggered it still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderNotice {
    FellBack { from: String, to: String, reason: String },
}

pub type LocalLoader = Box<dyn FnOnce() -> Result<Box<dyn Embedder>> + Send>;

enum LocalSlot {
    Pending(LocalLoader),
    Ready(Box<dyn Embedder>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(500), max_backoff: Duration::from_secs(30) }
    }
}

impl From<&ExternalConfig> for RetryPolicy {
    fn from(c: &ExternalConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            backoff: Duration::from_millis(c.backoff_ms),
            max_backoff: Duration::from_millis(c.max_backoff_ms),
        }
    }
}

/// What the dispatcher would embed with right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBackend {
    pub kind: BackendKind,
    pub id: String,
    pub dim: usize,
}

pub struct EmbeddingDispatcher {
    external: Option<Box<dyn Embedder>>,
    local: LocalSlot,
    retry: RetryPolicy,
    fell_back: bool,
    listeners: Vec<mpsc::Sender<EmbedderNotice>>,
}

impl EmbeddingDispatcher {
    pub fn local_only(loader: LocalLoader) -> Self {
        Self { external: None, local: LocalSlot::Pending(loader), retry: RetryPolicy::default(), fell_back: false, listeners: Vec::new() }
    }

    pub fn with_external(external: Box<dyn Embedder>, loader: LocalLoader, retry: RetryPolicy) -> Self {
        Self { external: Some(external), local: LocalSlot::Pending(loader), retry, fell_back: false, listeners: Vec::new() }
    }

    /// Build the dispatcher described by `config`. Relative model paths are
    /// resolved against `base`. Nothing is loaded or contacted yet.
    pub fn from_config(config: &RagConfig, base: &Path) -> Result<Self> {
        config.validate()?;
        let local = config.local.clone();
        let base: PathBuf = base.to_path_buf();
        let loader: LocalLoader = Box::new(move || load_local(&local, &base));
        match config.backend {
            BackendKind::Local => Ok(Self::local_only(loader)),
            BackendKind::External => {
                let remote = RemoteEmbedder::new(&config.external)?;
                Ok(Self::with_external(Box::new(remote), loader, RetryPolicy::from(&config.external)))
            }
        }
    }

    /// Receive fallback notices on the returned channel.
    pub fn subscribe(&mut self) -> mpsc::Receiver<EmbedderNotice> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    pub fn has_fallen_back(&self) -> bool {
        self.fell_back
    }

    pub fn active(&mut self) -> Result<ActiveBackend> {
        if !self.fell_back {
            if let Some(ext) = &self.external {
                return Ok(ActiveBackend { kind: ext.kind(), id: ext.backend_id().to_string(), dim: ext.dim() });
            }
        }
        let local = self.local()?;
        Ok(ActiveBackend { kind: local.kind(), id: local.backend_id().to_string(), dim: local.dim() })
    }

    pub fn active_backend_id(&mut self) -> Result<String> {
        self.active().map(|a| a.id)
    }

    pub fn active_dim(&mut self) -> Result<usize> {
        self.active().map(|a| a.dim)
    }

    /// One vector per text, in order, all from the same backend.
    pub fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.fell_back {
            if let Some(ext) = self.external.as_deref() {
                match embed_external(ext, &self.retry, texts) {
                    Ok(vectors) => return Ok(vectors),
                    Err(err) => {
                        let from = ext.backend_id().to_string();
                        self.fall_back(from, &err)?;
                    }
                }
            }
        }
        let local = self.local()?;
        embed_local(local, texts)
    }

    fn fall_back(&mut self, from: String, cause: &Error) -> Result<()> {
        let reason = cause.to_string();
        let to = match self.local() {
            Ok(local) => local.backend_id().to_string(),
            Err(e) => {
                return Err(Error::EmbeddingUnavailable(format!("external backend failed ({}); {}", reason, e)));
            }
        };
        self.fell_back = true;
        warn!(%from, %to, %reason, "external embeddings unavailable, falling back to local model for this session");
        let notice = EmbedderNotice::FellBack { from, to, reason };
        // A dropped receiver only means nobody is listening any more.
        self.listeners.retain(|tx| tx.send(notice.clone()).is_ok());
        Ok(())
    }

    fn local(&mut self) -> Result<&dyn Embedder> {
        let slot = std::mem::replace(&mut self.local, LocalSlot::Failed(String::new()));
        self.local = match slot {
            LocalSlot::Pending(loader) => match loader() {
                Ok(embedder) => {
                    info!(backend = embedder.backend_id(), dim = embedder.dim(), "local embedding backend ready");
                    LocalSlot::Ready(embedder)
                }
                Err(e) => {
                    warn!(error = %e, "local embedding backend failed to load");
                    LocalSlot::Failed(e.to_string())
                }
            },
            other => other,
        };
        match &self.local {
            LocalSlot::Ready(embedder) => Ok(embedder.as_ref()),
            LocalSlot::Failed(reason) => Err(Error::EmbeddingUnavailable(format!("local embedding backend unusable: {}", reason))),
            LocalSlot::Pending(_) => Err(Error::EmbeddingUnavailable("local embedding backend not loaded".to_string())),
        }
    }
}

fn load_local(config: &LocalConfig, base: &Path) -> Result<Box<dyn Embedder>> {
    match config.model {
        LocalModel::Hashing => Ok(Box::new(HashingEmbedder::new(config.hashing_dim).with_batch_size(config.batch_size))),
        LocalModel::BgeM3 => {
            let configured = config.model_dir.as_deref().map(|d| resolve_with_base(base, d));
            let dir = resolve_model_dir(configured.as_deref())?;
            Ok(Box::new(BgeM3Embedder::load(&dir, config.batch_size)?))
        }
    }
}

fn check_shape(backend: &dyn Embedder, expected: usize, vectors: &[Vec<f32>]) -> std::result::Result<(), String> {
    if vectors.len() != expected {
        return Err(format!("{} returned {} vectors for {} texts", backend.backend_id(), vectors.len(), expected));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != backend.dim()) {
        return Err(format!("{} returned a {}-d vector, declared {}", backend.backend_id(), v.len(), backend.dim()));
    }
    Ok(())
}

fn embed_external(backend: &dyn Embedder, retry: &RetryPolicy, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for (n, batch) in texts.chunks(backend.max_batch().max(1)).enumerate() {
        debug!(batch = n, size = batch.len(), "external sub-batch");
        out.extend(call_with_retry(backend, retry, batch)?);
    }
    Ok(out)
}

fn call_with_retry(backend: &dyn Embedder, retry: &RetryPolicy, batch: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut delay = retry.backoff;
    let mut attempt = 1u32;
    loop {
        let err = match backend.embed_batch(batch) {
            Ok(vectors) => match check_shape(backend, batch.len(), &vectors) {
                Ok(()) => return Ok(vectors),
                Err(msg) => Error::transient(TransientKind::Malformed, msg),
            },
            Err(e) => e,
        };
        let (retryable, hint) = match &err {
            Error::EmbeddingTransient { kind, retry_after_ms, .. } => (kind.is_retryable(), *retry_after_ms),
            _ => (false, None),
        };
        warn!(attempt, max_attempts = retry.max_attempts, error = %err, "external embedding call failed");
        if !retryable || attempt >= retry.max_attempts {
            return Err(err);
        }
        let wait = hint.map(Duration::from_millis).unwrap_or(delay).min(retry.max_backoff);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        delay = delay.saturating_mul(2);
        attempt += 1;
    }
}

fn embed_local(backend: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(backend.max_batch().max(1)) {
        let vectors = backend.embed_batch(batch)?;
        check_shape(backend, batch.len(), &vectors).map_err(Error::EmbeddingUnavailable)?;
        out.extend(vectors);
    }
    Ok(out)
}
