//! # osgrep
//!
//! A local, CLI-native semantic code search engine: index a repository
//! once, then query it in natural language and get ranked code spans
//! with file paths, line ranges, and previews. Designed to complement
//! exact-match search by finding code by *intent*.
//!
//! ## Pipeline
//!
//! ```text
//!   indexing                              searching
//!
//!   walk project tree                     query
//!        │                                  │ encodeQuery (worker)
//!        ▼                                  ▼
//!   diff against meta-store         ┌───────────────┐
//!   (content digests)               │  q vector      │
//!        │                          └──┬─────────┬──┘
//!        ▼                             ▼         ▼
//!   chunker (AST / paragraphs      vector      full-text
//!   + per-file anchor)             search ×200 search ×200
//!        │                             └────┬────┘
//!        ▼                                  ▼
//!   worker pool ── embedBatch       RRF fusion (k=20)
//!        │                                  │
//!        ▼                                  ▼
//!   vector store (rows + FTS        rerank top 50 (ColBERT
//!   + IVF index)                    MaxSim, in worker)
//!                                           │
//!                                           ▼
//!                                   blend + boosts → results
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-driven configuration and pipeline constants
//! - [`models`] - Shared data types: rows, hits, filters, sync reports
//! - [`meta`] - Content digests and the `path → hash` meta-store
//! - [`lock`] - Per-repository writer lock with stale-holder reclaim
//! - [`files`] - Candidate-file enumeration with ignore rules
//! - [`chunking`] - AST declaration chunks, paragraph fallback, anchors
//! - [`model`] - Embedder/reranker adapters (candle) and hash fakes
//! - [`worker`] - The subprocess inference pool and its wire protocol
//! - [`store`] - The vector+text store (disk-backed and in-memory fake)
//! - [`sync`] - The incremental indexing state machine
//! - [`search`] - Hybrid retrieval: fan-out, RRF, rerank, boosts
//! - [`server`] - The HTTP shell (`/search`, `/health`)
//! - [`watch`] - Debounced re-sync on file events (experimental)

pub mod chunking;
pub mod config;
pub mod error;
pub mod files;
pub mod lock;
pub mod meta;
pub mod model;
pub mod models;
pub mod search;
pub mod server;
pub mod store;
pub mod sync;
pub mod watch;
pub mod worker;
