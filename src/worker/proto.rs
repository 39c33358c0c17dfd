//! Wire protocol between the pool and its worker processes.
//!
//! Newline-delimited JSON over stdin/stdout. Each request carries an id;
//! the worker answers every request with a response echoing that id,
//! holding either a result or an error string. Workers handle one request
//! at a time, so the id is a correlation check rather than a demux key.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload", rename_all = "camelCase")]
pub enum WorkerMethod {
    /// Embed a batch of chunk texts.
    ProcessFile { texts: Vec<String> },
    /// Embed a query with the retrieval instruction prefix.
    EncodeQuery { text: String },
    /// Late-interaction rerank of candidate documents.
    Rerank { query: String, docs: Vec<String> },
}

impl WorkerMethod {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerMethod::ProcessFile { .. } => "processFile",
            WorkerMethod::EncodeQuery { .. } => "encodeQuery",
            WorkerMethod::Rerank { .. } => "rerank",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: u64,
    #[serde(flatten)]
    pub method: WorkerMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerResult {
    Embeddings { vectors: Vec<Vec<f32>> },
    QueryVector { vector: Vec<f32> },
    Scores { scores: Vec<f32> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
