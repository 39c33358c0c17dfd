//! ColBERT-style late-interaction reranking.
//!
//! Query and document are encoded into per-token matrices of shape
//! `[T, COLBERT_DIM]`; the document side is int8-quantized with a per-doc
//! scale, mirroring the model's storage contract. The score is MaxSim:
//! `Σ_t max_s q_t · d_s`. Tokens on the skiplist are excluded from both
//! sides before scoring.

use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::config::COLBERT_DIM;
use crate::error::{Error, Result};
use crate::model::{is_skiplisted, Reranker};

const MAX_TOKENS: usize = 512;

/// An int8-quantized token matrix with its per-doc dequantization scale.
#[derive(Debug, Clone)]
pub struct QuantizedDoc {
    pub data: Vec<i8>,
    pub scale: f32,
    pub tokens: usize,
    pub dim: usize,
}

/// Quantize a token matrix to int8 with a single per-doc scale.
pub fn quantize(matrix: &[Vec<f32>]) -> QuantizedDoc {
    let dim = matrix.first().map(Vec::len).unwrap_or(COLBERT_DIM);
    let max_abs = matrix
        .iter()
        .flatten()
        .fold(0f32, |acc, &v| acc.max(v.abs()));
    let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };

    let data = matrix
        .iter()
        .flatten()
        .map(|&v| (v / scale).round().clamp(-127.0, 127.0) as i8)
        .collect();

    QuantizedDoc {
        data,
        scale,
        tokens: matrix.len(),
        dim,
    }
}

/// Restore a quantized token matrix to f32.
pub fn dequantize(doc: &QuantizedDoc) -> Vec<Vec<f32>> {
    doc.data
        .chunks(doc.dim)
        .map(|row| row.iter().map(|&v| v as f32 * doc.scale).collect())
        .collect()
}

/// Late-interaction score: per query token, the best dot product against
/// any document token, summed over query tokens.
pub fn max_sim(query: &[Vec<f32>], doc: &[Vec<f32>]) -> f32 {
    query
        .iter()
        .map(|q| {
            doc.iter()
                .map(|d| q.iter().zip(d).map(|(a, b)| a * b).sum::<f32>())
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .filter(|s| s.is_finite())
        .sum()
}

/// Candle-backed ColBERT reranker: a BERT encoder with a linear projection
/// head down to `COLBERT_DIM` per token.
pub struct ColbertReranker {
    model: BertModel,
    projection: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

impl ColbertReranker {
    /// Load artifacts from `dir`: `config.json`, `tokenizer.json`,
    /// `model.safetensors` (encoder weights plus the `linear` head).
    pub fn load(dir: &Path) -> Result<Self> {
        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(dir.join("config.json"))?;
        let config: BertConfig = serde_json::from_str(&config_str)?;

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| Error::Model(format!("failed to load reranker tokenizer: {e}")))?;

        let weights = dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], candle_core::DType::F32, &device)
                .map_err(|e| Error::Model(format!("failed to map reranker weights: {e}")))?
        };

        let projection = candle_nn::linear(config.hidden_size, COLBERT_DIM, vb.pp("linear"))
            .map_err(|e| Error::Model(format!("failed to load projection head: {e}")))?;
        let model = BertModel::load(vb, &config)
            .map_err(|e| Error::Model(format!("failed to load reranker encoder: {e}")))?;

        Ok(Self {
            model,
            projection,
            tokenizer,
            device,
        })
    }

    /// Per-token unit vectors with skiplisted tokens removed.
    fn encode(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;

        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(MAX_TOKENS);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let input_ids = Tensor::new(ids.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| Error::Model(e.to_string()))?;
        let token_type_ids = input_ids
            .zeros_like()
            .map_err(|e| Error::Model(e.to_string()))?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, None)
            .map_err(|e| Error::Model(e.to_string()))?;
        let projected = self
            .projection
            .forward(&hidden)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(|e| Error::Model(e.to_string()))?;

        Ok(ids
            .iter()
            .zip(projected)
            .filter(|(&id, _)| !is_skiplisted(id))
            .map(|(_, mut v)| {
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
                for x in v.iter_mut() {
                    *x /= norm;
                }
                v
            })
            .collect())
    }
}

impl Reranker for ColbertReranker {
    fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        let query_tokens = self.encode(query)?;
        docs.iter()
            .map(|doc| {
                let doc_tokens = self.encode(doc)?;
                let quantized = quantize(&doc_tokens);
                let restored = dequantize(&quantized);
                Ok(max_sim(&query_tokens, &restored))
            })
            .collect()
    }
}
