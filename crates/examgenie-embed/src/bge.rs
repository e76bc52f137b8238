//! BGE-M3 (XLM-RoBERTa) sentence embeddings computed locally with candle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use examgenie_core::error::{Error, Result};
use examgenie_core::traits::Embedder;
use examgenie_core::types::BackendKind;

use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

pub const BGE_MAX_LEN: usize = 256;

pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    batch_size: usize,
    id: String,
}

/// Metal when built with the `metal` feature and a GPU is present, else CPU.
fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) {
            info!("embedding device: Metal (MPS)");
            return dev;
        }
    }
    info!("embedding device: CPU");
    Device::Cpu
}

fn unavailable(what: &str, e: impl std::fmt::Display) -> Error {
    Error::EmbeddingUnavailable(format!("{}: {}", what, e))
}

impl BgeM3Embedder {
    /// Load tokenizer, config and `pytorch_model.bin` weights from `model_dir`.
    pub fn load(model_dir: &Path, batch_size: usize) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading BGE-M3 model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| unavailable(&format!("failed to load tokenizer from {}", tokenizer_path.display()), e))?;

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)
            .map_err(|e| unavailable(&format!("failed to read {}", config_path.display()), e))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw_config).map_err(|e| unavailable("invalid model config", e))?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)
            .ok()
            .and_then(|v| v.get("hidden_size").and_then(|h| h.as_u64()))
            .map(|h| h as usize)
            .ok_or_else(|| Error::EmbeddingUnavailable("model config has no hidden_size".to_string()))?;

        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)
            .map_err(|e| unavailable(&format!("failed to read weights {}", weights_path.display()), e))?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(|e| unavailable("failed to build model", e))?;

        info!(dim, "BGE-M3 model loaded");
        Ok(Self { model, tokenizer, device, dim, batch_size: batch_size.max(1), id: format!("local:bge-m3:d{}", dim) })
    }

    fn embed_one(&self, text: &str) -> candle_core::Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, BGE_MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, BGE_MAX_LEN), DType::I64, &self.device)?;
        let hidden_states = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden_states, &attention_mask)?;
        let emb = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1::<f32>()?;
        if start.elapsed().as_millis() > 100 {
            warn!(elapsed_ms = start.elapsed().as_millis() as u64, "slow embedding");
        }
        Ok(emb)
    }
}

impl Embedder for BgeM3Embedder {
    fn backend_id(&self) -> &str { &self.id }
    fn kind(&self) -> BackendKind { BackendKind::Local }
    fn dim(&self) -> usize { self.dim }
    fn max_batch(&self) -> usize { self.batch_size }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(n = texts.len(), "bge-m3 batch");
        texts
            .iter()
            .map(|t| self.embed_one(t).map_err(|e| unavailable("local embedding failed", e)))
            .collect()
    }
}

/// Pick the model directory: the configured one if given, otherwise the
/// conventional `models/bge-m3` next to or above the working directory.
pub fn resolve_model_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        if dir.exists() {
            return Ok(dir.to_path_buf());
        }
        return Err(Error::EmbeddingUnavailable(format!("model directory {} does not exist", dir.display())));
    }
    for candidate in ["models/bge-m3", "../models/bge-m3"] {
        let p = Path::new(candidate);
        if p.exists() {
            debug!(dir = %p.display(), "using default model dir");
            return Ok(p.to_path_buf());
        }
    }
    Err(Error::EmbeddingUnavailable("could not locate BGE-M3 model directory".to_string()))
}
