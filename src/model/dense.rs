//! Candle-backed dense embedder: BERT encoder, CLS pooling, unit vectors.

use std::path::Path;

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::config::EMBED_DIM;
use crate::error::{Error, Result};
use crate::model::Embedder;

const MAX_TOKENS: usize = 512;

pub struct DenseEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl DenseEmbedder {
    /// Load artifacts from `dir`: `config.json`, `tokenizer.json`,
    /// `model.safetensors`. Downloading them is the caller's problem.
    pub fn load(dir: &Path) -> Result<Self> {
        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(dir.join("config.json")).map_err(|e| {
            Error::Model(format!(
                "missing embedder config at {}: {e}",
                dir.join("config.json").display()
            ))
        })?;
        let config: BertConfig = serde_json::from_str(&config_str)?;

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| Error::Model(format!("failed to load embedder tokenizer: {e}")))?;

        let weights = dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], candle_core::DType::F32, &device)
                .map_err(|e| Error::Model(format!("failed to map embedder weights: {e}")))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| Error::Model(format!("failed to load embedder: {e}")))?;

        tracing::info!("dense embedder loaded from {}", dir.display());
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;

        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(MAX_TOKENS);

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

        // CLS pooling: the first token's hidden state.
        let mut vector = hidden
            .i((0, 0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::Model(e.to_string()))?;

        if vector.len() != EMBED_DIM {
            return Err(Error::Model(format!(
                "embedder produced {} dimensions, expected {EMBED_DIM}",
                vector.len()
            )));
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
        for x in vector.iter_mut() {
            *x /= norm;
        }
        Ok(vector)
    }
}

impl Embedder for DenseEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}
