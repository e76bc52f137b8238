use std::fmt;

use thiserror::Error;

/// Why a single call to the external embedding provider failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Auth,
    Network,
    RateLimited,
    Malformed,
}

impl TransientKind {
    /// Auth failures do not get better by asking again.
    pub fn is_retryable(self) -> bool {
        !matches!(self, TransientKind::Auth)
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransientKind::Auth => "auth",
            TransientKind::Network => "network",
            TransientKind::RateLimited => "rate limited",
            TransientKind::Malformed => "malformed response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Embedding call failed ({kind}): {message}")]
    EmbeddingTransient {
        kind: TransientKind,
        message: String,
        /// Server-provided hint, only set for rate limiting.
        retry_after_ms: Option<u64>,
    },

    #[error("No usable embedding backend: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector dimensionality mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index corrupted: {0}")]
    IndexCorruption(String),

    #[error("Index was built with '{index}' but queries would be embedded with '{active}'")]
    BackendMismatch { index: String, active: String },

    #[error("Index not ready: call ensure_index before retrieve")]
    IndexNotReady,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Error::EmbeddingTransient { kind, message: message.into(), retry_after_ms: None }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
