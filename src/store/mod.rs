//! The persistent chunk store: vector nearest-neighbor plus full-text
//! retrieval behind one capability trait.
//!
//! Implementations are swappable: [`DiskStore`] is the production store,
//! [`MemoryStore`] a fake for tests. Callers must not depend on
//! implementation-specific behavior beyond this trait.

mod disk;
mod fts;
mod ivf;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::ChunkRow;

/// Typed row predicate. The parameterized replacement for string-built
/// `path LIKE '...'` filters, so there is nothing to escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    PathEquals(String),
    PathPrefix(String),
}

impl Predicate {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Predicate::PathEquals(p) => path == p,
            Predicate::PathPrefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// A row with its retrieval score. For `vector_search` the score is the
/// cosine distance (lower is closer); for `fts_search` it is the BM25
/// score (higher is better). Fusion only consumes the rank order.
#[derive(Debug, Clone)]
pub struct ScoredRow {
    pub row: ChunkRow,
    pub score: f32,
}

pub trait Store: Send + Sync {
    /// Append rows. Rows whose vector dimension differs from the store's
    /// are rejected with `DimensionMismatch`.
    fn add(&self, rows: Vec<ChunkRow>) -> Result<()>;

    /// Delete all rows for one path.
    fn delete_path(&self, path: &str) -> Result<()>;

    /// Top-k rows by cosine distance to `query`.
    fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<Vec<ScoredRow>>;

    /// Top-k rows by full-text relevance on `content`.
    fn fts_search(&self, query: &str, k: usize, filter: Option<&Predicate>)
        -> Result<Vec<ScoredRow>>;

    /// Idempotent; cheap when the index already exists.
    fn create_fts_index(&self) -> Result<()>;

    /// Idempotent. A no-op below `config::VECTOR_INDEX_MIN_ROWS` rows,
    /// where a flat scan is faster and index training would fail.
    fn create_vector_index(&self) -> Result<()>;

    fn count_rows(&self) -> Result<usize>;

    /// Distinct paths currently present in the store.
    fn paths(&self) -> Result<Vec<String>>;

    fn close(&self) -> Result<()>;
}
