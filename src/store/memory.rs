//! In-memory store fake for tests: same trait, no disk, no tantivy.
//!
//! FTS is approximated with token-frequency scoring, which is enough for
//! ranking assertions without an inverted index.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use super::{ivf, Predicate, ScoredRow, Store};
use crate::error::{Error, Result};
use crate::models::ChunkRow;

pub struct MemoryStore {
    dim: usize,
    rows: RwLock<Vec<ChunkRow>>,
}

impl MemoryStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: RwLock::new(Vec::new()),
        }
    }
}

fn token_score(query: &str, content: &str) -> f32 {
    let content_lower = content.to_lowercase();
    let content_tokens: Vec<&str> = content_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut score = 0f32;
    for token in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        score += content_tokens.iter().filter(|t| **t == token).count() as f32;
    }
    score
}

impl Store for MemoryStore {
    fn add(&self, rows: Vec<ChunkRow>) -> Result<()> {
        for row in &rows {
            if row.vector.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    got: row.vector.len(),
                    want: self.dim,
                });
            }
        }
        self.rows.write().extend(rows);
        Ok(())
    }

    fn delete_path(&self, path: &str) -> Result<()> {
        self.rows.write().retain(|r| r.path != path);
        Ok(())
    }

    fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<Vec<ScoredRow>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                got: query.len(),
                want: self.dim,
            });
        }
        let rows = self.rows.read();
        let mut hits: Vec<ScoredRow> = rows
            .iter()
            .filter(|r| filter.map_or(true, |p| p.matches(&r.path)))
            .map(|r| ScoredRow {
                row: r.clone(),
                score: ivf::distance(query, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn fts_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<Vec<ScoredRow>> {
        let rows = self.rows.read();
        let mut hits: Vec<ScoredRow> = rows
            .iter()
            .filter(|r| filter.map_or(true, |p| p.matches(&r.path)))
            .filter_map(|r| {
                let score = token_score(query, &r.content);
                (score > 0.0).then(|| ScoredRow {
                    row: r.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn create_fts_index(&self) -> Result<()> {
        Ok(())
    }

    fn create_vector_index(&self) -> Result<()> {
        Ok(())
    }

    fn count_rows(&self) -> Result<usize> {
        Ok(self.rows.read().len())
    }

    fn paths(&self) -> Result<Vec<String>> {
        let set: BTreeSet<String> = self.rows.read().iter().map(|r| r.path.clone()).collect();
        Ok(set.into_iter().collect())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, path: &str, content: &str, vector: Vec<f32>) -> ChunkRow {
        ChunkRow {
            id: id.to_string(),
            path: path.to_string(),
            hash: "h".to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 1,
            chunk_index: 0,
            is_anchor: false,
            context_prev: String::new(),
            context_next: String::new(),
            vector,
        }
    }

    #[test]
    fn test_fts_scoring_prefers_frequency() {
        let store = MemoryStore::new(2);
        store
            .add(vec![
                row("1", "a.rs", "pool pool pool", vec![1.0, 0.0]),
                row("2", "b.rs", "pool once", vec![0.0, 1.0]),
            ])
            .unwrap();
        let hits = store.fts_search("pool", 10, None).unwrap();
        assert_eq!(hits[0].row.path, "a.rs");
    }

    #[test]
    fn test_vector_search_respects_filter() {
        let store = MemoryStore::new(2);
        store
            .add(vec![
                row("1", "src/a.rs", "x", vec![1.0, 0.0]),
                row("2", "tests/b.rs", "x", vec![1.0, 0.0]),
            ])
            .unwrap();
        let filter = Predicate::PathPrefix("src/".to_string());
        let hits = store.vector_search(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row.path, "src/a.rs");
    }

    #[test]
    fn test_dimension_checked() {
        let store = MemoryStore::new(2);
        assert!(store.add(vec![row("1", "a.rs", "x", vec![1.0])]).is_err());
    }
}
