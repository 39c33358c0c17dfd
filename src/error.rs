use thiserror::Error;

/// Errors produced by the indexing and search pipeline.
///
/// Per-file failures (`Decode`, `Chunk`, worker errors) are contained by the
/// syncer: the file is skipped with a warning and the sync continues.
/// Per-repository failures (`LockHeld`, `SchemaMigration`) abort the
/// operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("index lock held by live pid {pid} (acquired {since})")]
    LockHeld { pid: u32, since: String },

    #[error("{path}: file is not valid UTF-8")]
    Decode { path: String },

    #[error("worker exited unexpectedly: {0}")]
    WorkerCrash(String),

    #[error("worker request timed out after {0} ms")]
    WorkerTimeout(u64),

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("worker protocol error: {0}")]
    WorkerProtocol(String),

    #[error("vector has {got} dimensions, store expects {want}")]
    DimensionMismatch { got: usize, want: usize },

    #[error("schema migration failed: {0}")]
    SchemaMigration(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Fts(#[from] tantivy::TantivyError),
}

pub type Result<T> = std::result::Result<T, Error>;
