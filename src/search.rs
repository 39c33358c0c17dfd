//! Hybrid retrieval: parallel dense + full-text candidate fetch, fused
//! with reciprocal-rank fusion, rescored by the late-interaction
//! reranker on a truncated head, then boosted and ranked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{CANDIDATE_POOL, RERANK_HEAD, RRF_K};
use crate::error::{Error, Result};
use crate::model::Inference;
use crate::models::{ChunkRow, Filters, SearchHit};
use crate::store::{Predicate, ScoredRow, Store};

pub struct Searcher {
    store: Arc<dyn Store>,
    inference: Arc<dyn Inference>,
}

/// A fused candidate keyed by `(path, start_line)`.
#[derive(Debug, Clone)]
pub struct Fused {
    pub row: ChunkRow,
    pub rrf: f32,
}

impl Searcher {
    pub fn new(store: Arc<dyn Store>, inference: Arc<dyn Inference>) -> Self {
        Self { store, inference }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchHit>> {
        let query = query.trim().to_string();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let predicate = predicate_from_filters(filters);
        let query_vector = self.inference.encode_query(&query).await?;

        // ── Candidate fan-out, both arms in parallel ─────────────
        let vector_store = Arc::clone(&self.store);
        let vector_query = query_vector.clone();
        let vector_pred = predicate.clone();
        let vector_task = tokio::task::spawn_blocking(move || {
            vector_store.vector_search(&vector_query, CANDIDATE_POOL, vector_pred.as_ref())
        });

        let fts_store = Arc::clone(&self.store);
        let fts_query = query.clone();
        let fts_pred = predicate.clone();
        let fts_task = tokio::task::spawn_blocking(move || {
            fts_store.fts_search(&fts_query, CANDIDATE_POOL, fts_pred.as_ref())
        });

        let (vector_hits, fts_hits) = tokio::join!(vector_task, fts_task);
        let vector_hits = vector_hits.map_err(|e| Error::Io(std::io::Error::other(e)))??;
        let fts_hits = fts_hits.map_err(|e| Error::Io(std::io::Error::other(e)))??;

        // ── Fuse and rescore ─────────────────────────────────────
        let fused = rrf_fusion(&[vector_hits, fts_hits]);
        if fused.is_empty() {
            return Ok(Vec::new());
        }
        let max_rrf = fused[0].rrf.max(f32::EPSILON);

        let head = fused.len().min(RERANK_HEAD);
        let docs: Vec<String> = fused[..head].iter().map(|f| f.row.content.clone()).collect();
        let rerank_scores = match self.inference.rerank(&query, docs).await {
            Ok(scores) if scores.len() == head => Some(normalize_scores(scores)),
            Ok(scores) => {
                tracing::warn!(
                    "reranker returned {} scores for {head} docs; using RRF order",
                    scores.len()
                );
                None
            }
            Err(e) => {
                tracing::warn!("rerank failed ({e}); using RRF order");
                None
            }
        };

        let rerank_weight = if looks_code_like(&query) { 0.55 } else { 0.60 };

        let mut hits: Vec<(f32, &Fused)> = fused
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let rrf_norm = candidate.rrf / max_rrf;
                let blended = match &rerank_scores {
                    Some(scores) if i < head => {
                        rerank_weight * scores[i] + (1.0 - rerank_weight) * rrf_norm
                    }
                    Some(_) => (1.0 - rerank_weight) * rrf_norm,
                    None => rrf_norm,
                };
                (blended + heuristic_boost(&query, &candidate.row), candidate)
            })
            .collect();

        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        Ok(hits
            .into_iter()
            .map(|(score, candidate)| to_hit(&candidate.row, score))
            .collect())
    }
}

/// Reciprocal-rank fusion over ranked candidate lists, keyed by
/// `(path, start_line)`. The first occurrence of a key supplies the
/// record; scores sum, so fusion is commutative in its inputs.
pub fn rrf_fusion(lists: &[Vec<ScoredRow>]) -> Vec<Fused> {
    let mut by_key: HashMap<(String, u32), Fused> = HashMap::new();

    for list in lists {
        for (rank, scored) in list.iter().enumerate() {
            let key = (scored.row.path.clone(), scored.row.start_line);
            let rrf = 1.0 / (RRF_K + rank as f32 + 1.0);
            by_key
                .entry(key)
                .and_modify(|f| f.rrf += rrf)
                .or_insert_with(|| Fused {
                    row: scored.row.clone(),
                    rrf,
                });
        }
    }

    let mut fused: Vec<Fused> = by_key.into_values().collect();
    fused.sort_by(|a, b| {
        b.rrf
            .partial_cmp(&a.rrf)
            .unwrap_or(std::cmp::Ordering::Equal)
            // deterministic order between equal scores
            .then_with(|| a.row.path.cmp(&b.row.path))
            .then_with(|| a.row.start_line.cmp(&b.row.start_line))
    });
    fused
}

/// Additive boosts applied after score blending.
fn heuristic_boost(query: &str, row: &ChunkRow) -> f32 {
    let mut boost = 0.0f32;
    let query_lower = query.to_lowercase();
    let content_lower = row.content.to_lowercase();

    if query_lower.len() >= 3 && content_lower.contains(&query_lower) {
        boost += 0.25;
    }
    if row.is_anchor {
        boost += 0.12;
    }

    let query_tokens: HashSet<String> = tokenize(&query_lower).collect();
    let path_lower = row.path.to_lowercase();
    if query_tokens
        .iter()
        .any(|t| t.len() >= 3 && path_lower.contains(t.as_str()))
    {
        boost += 0.05;
    }

    let content_tokens: HashSet<String> = tokenize(&content_lower).collect();
    let overlap = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(t.as_str()))
        .count();
    boost += (overlap as f32 * 0.02).min(0.08);

    boost
}

/// Queries mentioning identifiers lean a little more on the lexical
/// evidence than prose queries do.
fn looks_code_like(query: &str) -> bool {
    query
        .chars()
        .any(|c| c.is_ascii_uppercase() || matches!(c, '_' | '`' | '(' | ')' | '/'))
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
}

/// Scale rerank scores into `[0, 1]` so they blend with normalized RRF.
fn normalize_scores(scores: Vec<f32>) -> Vec<f32> {
    let max = scores.iter().cloned().fold(0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.into_iter().map(|s| (s / max).max(0.0)).collect()
}

fn to_hit(row: &ChunkRow, score: f32) -> SearchHit {
    let mut text = String::new();
    for part in [&row.context_prev, &row.content, &row.context_next] {
        if part.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(part);
    }

    SearchHit {
        path: row.path.clone(),
        start_line: row.start_line,
        num_lines: row.end_line - row.start_line + 1,
        text,
        score,
        is_anchor: row.is_anchor,
    }
}

fn predicate_from_filters(filters: Option<&Filters>) -> Option<Predicate> {
    let filters = filters?;
    for clause in &filters.all {
        if clause.key == "path" && clause.operator == "starts_with" {
            return Some(Predicate::PathPrefix(clause.value.clone()));
        }
        tracing::debug!(
            "ignoring unsupported filter clause {}:{}",
            clause.key,
            clause.operator
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EMBED_DIM;
    use crate::model::{fake, LocalInference};
    use crate::models::Filters;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn row(path: &str, start: u32, content: &str, vector: Vec<f32>) -> ChunkRow {
        ChunkRow {
            id: format!("{path}:{start}"),
            path: path.to_string(),
            hash: "h".to_string(),
            content: content.to_string(),
            start_line: start,
            end_line: start + 4,
            chunk_index: 1,
            is_anchor: false,
            context_prev: String::new(),
            context_next: String::new(),
            vector,
        }
    }

    fn scored(row: ChunkRow, score: f32) -> ScoredRow {
        ScoredRow { row, score }
    }

    // ── RRF fusion ──────────────────────────────────────

    #[test]
    fn test_rrf_sums_across_lists() {
        let a = vec![scored(row("a.rs", 1, "x", vec![]), 0.1)];
        let b = vec![scored(row("a.rs", 1, "x", vec![]), 2.0)];
        let fused = rrf_fusion(&[a, b]);
        assert_eq!(fused.len(), 1);
        let expected = 2.0 / (RRF_K + 1.0);
        assert!((fused[0].rrf - expected).abs() < 1e-6);
    }

    #[test]
    fn test_rrf_is_commutative() {
        let list1 = vec![
            scored(row("a.rs", 1, "x", vec![]), 0.0),
            scored(row("b.rs", 1, "y", vec![]), 0.0),
        ];
        let list2 = vec![scored(row("b.rs", 1, "y", vec![]), 0.0)];

        let forward = rrf_fusion(&[list1.clone(), list2.clone()]);
        let reverse = rrf_fusion(&[list2, list1]);

        assert_eq!(forward.len(), reverse.len());
        for (f, r) in forward.iter().zip(&reverse) {
            assert_eq!(f.row.path, r.row.path);
            assert!((f.rrf - r.rrf).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rrf_dedupes_by_path_and_line() {
        let list = vec![
            scored(row("a.rs", 1, "first occurrence", vec![]), 0.0),
            scored(row("a.rs", 10, "different window", vec![]), 0.0),
        ];
        let fused = rrf_fusion(&[list]);
        assert_eq!(fused.len(), 2);
    }

    // ── boosts ──────────────────────────────────────────

    #[test]
    fn test_substring_boost() {
        let r = row("a.rs", 1, "the connection pool lives here", vec![]);
        let with = heuristic_boost("connection pool", &r);
        let without = heuristic_boost("unrelated words", &r);
        assert!(with >= without + 0.25);
    }

    #[test]
    fn test_anchor_boost() {
        let mut r = row("a.rs", 1, "zzz", vec![]);
        let plain = heuristic_boost("qqq", &r);
        r.is_anchor = true;
        assert!((heuristic_boost("qqq", &r) - plain - 0.12).abs() < 1e-6);
    }

    #[test]
    fn test_path_token_boost() {
        let r = row("src/database.rs", 1, "zzz", vec![]);
        assert!(heuristic_boost("database setup", &r) >= 0.05);
    }

    #[test]
    fn test_token_overlap_boost_capped() {
        let r = row(
            "a.rs",
            1,
            "alpha beta gamma delta epsilon zeta",
            vec![],
        );
        let boost = heuristic_boost("alpha beta gamma delta epsilon zeta", &r);
        // substring (0.25) + capped overlap (0.08)
        assert!((boost - 0.33).abs() < 1e-6);
    }

    #[test]
    fn test_code_like_detection() {
        assert!(looks_code_like("WorkerPool"));
        assert!(looks_code_like("snake_case_name"));
        assert!(looks_code_like("read(path)"));
        assert!(looks_code_like("src/sync"));
        assert!(!looks_code_like("where are errors logged"));
    }

    // ── end-to-end against the memory fake ──────────────

    fn embed(text: &str) -> Vec<f32> {
        use crate::model::Embedder;
        fake::HashEmbedder::new(EMBED_DIM)
            .embed_batch(&[text.to_string()])
            .unwrap()
            .remove(0)
    }

    fn sample_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(EMBED_DIM));
        store
            .add(vec![
                row(
                    "src/db.rs",
                    1,
                    "pub async fn connect_database(url: &str) -> Pool",
                    embed("pub async fn connect_database(url: &str) -> Pool"),
                ),
                row(
                    "src/http.rs",
                    1,
                    "async fn handle_request(req: Request) -> Response",
                    embed("async fn handle_request(req: Request) -> Response"),
                ),
                row(
                    "docs/notes.md",
                    1,
                    "meeting notes and roadmap",
                    embed("meeting notes and roadmap"),
                ),
            ])
            .unwrap();
        store
    }

    fn fake_inference() -> Arc<LocalInference> {
        Arc::new(LocalInference::new(
            Box::new(fake::HashEmbedder::new(EMBED_DIM)),
            Box::new(fake::HashReranker::new()),
        ))
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_file_first() {
        let searcher = Searcher::new(sample_store(), fake_inference());
        let hits = searcher.search("connect database", 10, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].path, "src/db.rs");
        // sorted non-increasing
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_filters() {
        let searcher = Searcher::new(sample_store(), fake_inference());
        let filters = Filters::path_prefix("src/");
        let hits = searcher
            .search("request database notes", 1, Some(&filters))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path.starts_with("src/"));
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let searcher = Searcher::new(sample_store(), fake_inference());
        assert!(searcher.search("   ", 10, None).await.unwrap().is_empty());
    }

    // ── rerank fallback ─────────────────────────────────

    struct BrokenRerank(Arc<LocalInference>);

    #[async_trait]
    impl crate::model::Inference for BrokenRerank {
        async fn embed_batch(&self, texts: Vec<String>) -> crate::error::Result<Vec<Vec<f32>>> {
            self.0.embed_batch(texts).await
        }
        async fn encode_query(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            self.0.encode_query(text).await
        }
        async fn rerank(&self, _: &str, _: Vec<String>) -> crate::error::Result<Vec<f32>> {
            Err(crate::error::Error::Model("rerank exploded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_rerank_failure_falls_back_to_rrf_order() {
        let store = sample_store();
        let broken = Searcher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(BrokenRerank(fake_inference())),
        );
        let hits = broken.search("connect database", 10, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].path, "src/db.rs");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
