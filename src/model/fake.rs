//! Deterministic hash-based models for tests and model-free environments.
//!
//! Token hashing gives embeddings whose cosine similarity tracks token
//! overlap, which is enough for ranking assertions without artifacts.

use std::hash::{Hash, Hasher};

use crate::config::COLBERT_DIM;
use crate::error::Result;
use crate::model::colbert;
use crate::model::{Embedder, Reranker};

/// Hash a token into a unit vector of the given dimension.
fn token_vector(token: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0f32; dim];
    let mut hasher = std::hash::DefaultHasher::new();
    token.hash(&mut hasher);
    let h = hasher.finish();
    let idx = (h as usize) % dim;
    let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
    v[idx] = 0.5 + val;
    // spread a second component so distinct tokens rarely collide exactly
    v[(idx + (h as usize % 7) + 1) % dim] = 0.25 + val / 2.0;
    normalize(&mut v);
    v
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
    for x in v.iter_mut() {
        *x /= norm;
    }
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Bag-of-hashed-tokens dense embedder.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0f32; self.dim];
                for token in tokens(&text.to_lowercase()) {
                    for (i, x) in token_vector(token, self.dim).iter().enumerate() {
                        v[i] += x;
                    }
                }
                normalize(&mut v);
                v
            })
            .collect())
    }
}

/// Hash-token late-interaction reranker.
///
/// Builds per-token matrices the same way the real model does and runs
/// them through the shared quantize → dequantize → MaxSim path, so the
/// scoring code is exercised even in fake mode.
pub struct HashReranker;

impl HashReranker {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }

    fn encode(text: &str) -> Vec<Vec<f32>> {
        tokens(&text.to_lowercase())
            .map(|t| token_vector(t, COLBERT_DIM))
            .collect()
    }
}

impl Reranker for HashReranker {
    fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
        let query_tokens = Self::encode(query);
        Ok(docs
            .iter()
            .map(|doc| {
                let doc_tokens = Self::encode(doc);
                let quantized = colbert::quantize(&doc_tokens);
                let restored = colbert::dequantize(&quantized);
                colbert::max_sim(&query_tokens, &restored)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EMBED_DIM;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_embeddings_deterministic_and_unit_length() {
        let embedder = HashEmbedder::new(EMBED_DIM);
        let a = embedder.embed_batch(&["fn main".to_string()]).unwrap();
        let b = embedder.embed_batch(&["fn main".to_string()]).unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashEmbedder::new(EMBED_DIM);
        let vs = embedder
            .embed_batch(&[
                "database connection pool".to_string(),
                "database connection handling".to_string(),
                "red green refactor cycle".to_string(),
            ])
            .unwrap();
        assert!(cosine(&vs[0], &vs[1]) > cosine(&vs[0], &vs[2]));
    }

    #[test]
    fn test_reranker_prefers_overlapping_doc() {
        let reranker = HashReranker::new();
        let scores = reranker
            .rerank(
                "parse config file",
                &[
                    "fn parse_config(file: &Path)".to_string(),
                    "unrelated networking code".to_string(),
                ],
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_reranker_empty_docs() {
        let reranker = HashReranker::new();
        assert!(reranker.rerank("q", &[]).unwrap().is_empty());
    }
}
