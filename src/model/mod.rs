//! Model façade: dense embeddings, late-interaction reranking, and the
//! async seam the pipeline talks to.
//!
//! The real adapters (candle) only ever run inside worker processes; the
//! main process reaches them through the worker pool's [`Inference`]
//! implementation. Tests and the worker runtime use [`LocalInference`]
//! with either real or hash-based fake models.

pub mod colbert;
pub mod dense;
pub mod fake;

use async_trait::async_trait;

use crate::config::{Config, EMBED_DIM};
use crate::error::Result;

/// Instruction prefix prepended to queries before embedding; matches the
/// asymmetric-retrieval training of the dense model.
pub const QUERY_PREFIX: &str = "Represent this sentence for searching relevant passages: ";

/// Token-id ranges (inclusive) excluded from MaxSim on both sides:
/// punctuation and special ids of the reranker's tokenizer.
const SKIPLIST_RANGES: [(u32, u32); 4] = [(2, 16), (27, 33), (60, 65), (92, 95)];

pub fn is_skiplisted(token_id: u32) -> bool {
    SKIPLIST_RANGES
        .iter()
        .any(|&(lo, hi)| token_id >= lo && token_id <= hi)
}

/// Dense embedding model: D-dimensional unit vectors.
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Late-interaction reranker: one relevance score per document.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>>;
}

/// What the pipeline needs from inference, regardless of where it runs.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
    async fn encode_query(&self, text: &str) -> Result<Vec<f32>>;
    async fn rerank(&self, query: &str, docs: Vec<String>) -> Result<Vec<f32>>;
}

/// Load the configured dense embedder (hash fake or candle model).
pub fn load_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    if config.fake_models {
        tracing::info!("using deterministic hash embedder");
        return Ok(Box::new(fake::HashEmbedder::new(EMBED_DIM)));
    }
    Ok(Box::new(dense::DenseEmbedder::load(
        &config.model_dir.join("embedder"),
    )?))
}

/// Load the configured reranker (hash fake or candle ColBERT model).
pub fn load_reranker(config: &Config) -> Result<Box<dyn Reranker>> {
    if config.fake_models {
        tracing::info!("using deterministic hash reranker");
        return Ok(Box::new(fake::HashReranker::new()));
    }
    Ok(Box::new(colbert::ColbertReranker::load(
        &config.model_dir.join("reranker"),
    )?))
}

/// In-process inference over loaded models.
pub struct LocalInference {
    embedder: Box<dyn Embedder>,
    reranker: Box<dyn Reranker>,
}

impl LocalInference {
    pub fn new(embedder: Box<dyn Embedder>, reranker: Box<dyn Reranker>) -> Self {
        Self { embedder, reranker }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(load_embedder(config)?, load_reranker(config)?))
    }

    pub fn embed_batch_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedder.embed_batch(texts)
    }

    pub fn encode_query_sync(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = format!("{QUERY_PREFIX}{text}");
        let mut vectors = self.embedder.embed_batch(&[prefixed])?;
        Ok(vectors.pop().unwrap_or_default())
    }

    pub fn rerank_sync(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        self.reranker.rerank(query, docs)
    }
}

#[async_trait]
impl Inference for LocalInference {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_sync(&texts)
    }

    async fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_query_sync(text)
    }

    async fn rerank(&self, query: &str, docs: Vec<String>) -> Result<Vec<f32>> {
        self.rerank_sync(query, &docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skiplist_ranges_inclusive() {
        for id in [2, 16, 27, 33, 60, 65, 92, 95] {
            assert!(is_skiplisted(id), "{id} should be skiplisted");
        }
        for id in [0, 1, 17, 26, 34, 59, 66, 91, 96, 30_000] {
            assert!(!is_skiplisted(id), "{id} should not be skiplisted");
        }
    }

    #[tokio::test]
    async fn test_encode_query_applies_prefix() {
        let local = LocalInference::new(
            Box::new(fake::HashEmbedder::new(EMBED_DIM)),
            Box::new(fake::HashReranker::new()),
        );
        let plain = local.embed_batch(vec!["hello".to_string()]).await.unwrap();
        let query = local.encode_query("hello").await.unwrap();
        // The prefix must change the embedding.
        assert_ne!(plain[0], query);
        assert_eq!(query.len(), EMBED_DIM);
    }
}
