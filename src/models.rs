use serde::{Deserialize, Serialize};

/// A stored chunk: one contiguous window of one file, plus its embedding.
///
/// All chunks written for a file in one sync share the file's content
/// `hash`; exactly one row per path has `is_anchor = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    /// Opaque unique id, generated at write time.
    pub id: String,
    /// Repo-relative path.
    pub path: String,
    /// Digest of the whole file at index time.
    pub hash: String,
    pub content: String,
    /// 1-based inclusive line range.
    pub start_line: u32,
    pub end_line: u32,
    /// Anchor is 0; body chunks are numbered from 1 in file order.
    pub chunk_index: u32,
    pub is_anchor: bool,
    /// Denormalized neighbor text, used to widen snippets at query time.
    /// Defaulted for rows written before these columns existed.
    #[serde(default)]
    pub context_prev: String,
    #[serde(default)]
    pub context_next: String,
    /// Dense embedding, unit length, dimension `config::EMBED_DIM`.
    pub vector: Vec<f32>,
}

/// A search result emitted to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub num_lines: u32,
    /// Chunk content widened with its stored neighbor context.
    pub text: String,
    pub score: f32,
    pub is_anchor: bool,
}

/// One clause of a structured search filter.
/// The only supported shape is `{key: "path", operator: "starts_with"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterClause {
    pub key: String,
    pub operator: String,
    pub value: String,
}

/// Conjunctive filter set attached to a search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub all: Vec<FilterClause>,
}

impl Filters {
    /// Build a filter restricting results to one path prefix.
    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            all: vec![FilterClause {
                key: "path".to_string(),
                operator: "starts_with".to_string(),
                value: prefix.into(),
            }],
        }
    }
}

/// `POST /search` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Optional directory filter; must resolve inside the project root.
    pub path: Option<String>,
}

fn default_limit() -> usize {
    10
}

/// `POST /search` response body.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub indexed: usize,
    pub errors: usize,
}

/// Phase of a sync run, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Enumerate,
    Index,
    Finalize,
}

/// Progress callback payload; emitted at least once per file.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub processed: usize,
    pub total: usize,
    pub current_path: Option<String>,
}
