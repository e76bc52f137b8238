//! OpenAI-compatible `/embeddings` HTTP backend (OpenRouter by default).

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use examgenie_core::config::ExternalConfig;
use examgenie_core::error::{Error, Result, TransientKind};
use examgenie_core::traits::Embedder;
use examgenie_core::types::BackendKind;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
    dim: usize,
    batch_size: usize,
    id: String,
}

/// Output size of well-known embedding models, looked up without the
/// `provider/` prefix.
pub fn native_dim(model: &str) -> Option<usize> {
    let name = model.rsplit('/').next().unwrap_or(model);
    match name {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

impl RemoteEmbedder {
    pub fn new(config: &ExternalConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.api_key.clone().unwrap_or_default();
        let dim = config.dimensions.or_else(|| native_dim(&config.model)).ok_or_else(|| {
            Error::config(format!("unknown output size for embedding model '{}'; set rag.external.dimensions", config.model))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            dim,
            batch_size: config.batch_size,
            id: format!("external:{}:d{}", config.model, dim),
        })
    }

    fn request(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        let body = EmbeddingRequest { model: &self.model, input: texts, dimensions: self.dimensions };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| Error::transient(TransientKind::Network, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<EmbeddingResponse>()
                .map_err(|e| Error::transient(TransientKind::Malformed, format!("undecodable response: {}", e)));
        }

        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000));
        let detail = response.text().unwrap_or_default();
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransientKind::Auth,
            StatusCode::TOO_MANY_REQUESTS => TransientKind::RateLimited,
            s if s.is_server_error() => TransientKind::Network,
            _ => TransientKind::Malformed,
        };
        Err(Error::EmbeddingTransient {
            kind,
            message: format!("HTTP {}: {}", status, detail.chars().take(200).collect::<String>()),
            retry_after_ms: if kind == TransientKind::RateLimited { retry_after_ms } else { None },
        })
    }
}

impl Embedder for RemoteEmbedder {
    fn backend_id(&self) -> &str { &self.id }
    fn kind(&self) -> BackendKind { BackendKind::External }
    fn dim(&self) -> usize { self.dim }
    fn max_batch(&self) -> usize { self.batch_size }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(n = texts.len(), model = %self.model, "external embedding request");
        let mut data = self.request(texts)?.data;
        if data.len() != texts.len() {
            return Err(Error::transient(
                TransientKind::Malformed,
                format!("expected {} embeddings, got {}", texts.len(), data.len()),
            ));
        }
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        data.into_iter()
            .map(|d| {
                if d.embedding.len() == self.dim {
                    Ok(d.embedding)
                } else {
                    Err(Error::transient(
                        TransientKind::Malformed,
                        format!("embedding has {} dimensions, expected {}", d.embedding.len(), self.dim),
                    ))
                }
            })
            .collect()
    }
}
