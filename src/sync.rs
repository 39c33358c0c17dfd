//! The incremental indexing pipeline: enumerate, diff against the
//! meta-store, delete stale rows, chunk + embed changed files under
//! bounded concurrency, and build indexes afterwards.
//!
//! Per-file failures are contained: the file is logged and skipped, the
//! sync continues. Only lock and schema failures abort the run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::chunking;
use crate::config::{Config, EMBED_BATCH_SIZE, EMBED_DIM, ROW_FLUSH_SIZE};
use crate::error::{Error, Result};
use crate::files::{self, IgnoreRules};
use crate::lock::IndexLock;
use crate::meta::{self, MetaStore};
use crate::model::Inference;
use crate::models::{ChunkRow, SyncPhase, SyncProgress, SyncReport};
use crate::store::Store;

/// Options for one sync run.
#[derive(Default)]
pub struct SyncOptions {
    /// Extra ignore rules from the collaborator (`.gitignore` loaders).
    pub ignore: IgnoreRules,
    /// Cooperative cancellation: checked before each file is scheduled.
    /// Outstanding work is awaited and flushed, never killed mid-batch.
    pub cancel: Arc<AtomicBool>,
}

/// A file that needs (re-)indexing this run.
struct PendingFile {
    abs_path: PathBuf,
    rel_path: String,
    hash: String,
    text: String,
}

pub struct Syncer {
    config: Config,
    store: Arc<dyn Store>,
    inference: Arc<dyn Inference>,
}

impl Syncer {
    pub fn new(config: Config, store: Arc<dyn Store>, inference: Arc<dyn Inference>) -> Self {
        Self {
            config,
            store,
            inference,
        }
    }

    /// Run one full sync of `project_root`.
    pub async fn sync(
        &self,
        project_root: &Path,
        options: &SyncOptions,
        mut on_progress: impl FnMut(SyncProgress),
    ) -> Result<SyncReport> {
        let lock = IndexLock::acquire(&project_root.join(".osgrep"))?;
        let started = Instant::now();

        let candidates = files::walk_project(project_root, &options.ignore);
        let mut meta_store = MetaStore::load(&self.config.meta_path());
        let mut report = SyncReport {
            scanned: candidates.len(),
            ..SyncReport::default()
        };

        // ── Diff against the meta-store ──────────────────────────
        let mut pending: Vec<PendingFile> = Vec::new();
        let mut on_disk: HashSet<PathBuf> = HashSet::new();

        for (i, file) in candidates.iter().enumerate() {
            on_progress(SyncProgress {
                phase: SyncPhase::Enumerate,
                processed: i + 1,
                total: candidates.len(),
                current_path: Some(file.rel_path.clone()),
            });

            let bytes = match tokio::fs::read(&file.abs_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("skipping {}: read failed: {e}", file.rel_path);
                    report.errors += 1;
                    continue;
                }
            };
            if bytes.is_empty() {
                continue;
            }
            on_disk.insert(file.abs_path.clone());

            let hash = meta::digest(&bytes);
            let existing = meta_store.get(&file.abs_path);
            if existing == Some(hash.as_str()) {
                report.unchanged += 1;
                continue;
            }

            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let err = Error::Decode {
                        path: file.rel_path.clone(),
                    };
                    tracing::warn!("skipping {}: {err}", file.rel_path);
                    report.errors += 1;
                    on_disk.remove(&file.abs_path);
                    continue;
                }
            };

            if existing.is_some() {
                report.changed += 1;
            } else {
                report.new += 1;
            }
            pending.push(PendingFile {
                abs_path: file.abs_path.clone(),
                rel_path: file.rel_path.clone(),
                hash,
                text,
            });
        }

        // ── Stale rows: tracked paths that vanished from disk ────
        let stale: Vec<PathBuf> = meta_store
            .paths_under(project_root)
            .filter(|p| !on_disk.contains(p))
            .collect();
        for abs in &stale {
            let rel = rel_of(project_root, abs);
            self.store_delete(&rel).await?;
            meta_store.delete(abs);
            report.stale += 1;
        }

        // Reconcile drift: rows whose path the meta-store no longer
        // tracks (for example after a crash between add and save).
        let tracked: HashSet<String> = meta_store
            .paths_under(project_root)
            .map(|p| rel_of(project_root, &p))
            .collect();
        let pending_rels: HashSet<&str> =
            pending.iter().map(|p| p.rel_path.as_str()).collect();
        for path in self.store_paths().await? {
            if !tracked.contains(&path) && !pending_rels.contains(path.as_str()) {
                tracing::warn!("reconciling untracked store rows for {path}");
                self.store_delete(&path).await?;
            }
        }

        // ── Index new and changed files ──────────────────────────
        let total = pending.len();
        let max_in_flight = (self.config.worker_count * 2).max(1);
        let mut tasks: JoinSet<(PendingFile, Result<Vec<ChunkRow>>)> = JoinSet::new();
        let mut queue = pending.into_iter();
        let mut buffer: Vec<ChunkRow> = Vec::new();
        let mut processed = 0usize;
        let mut cancelled = false;

        loop {
            while !cancelled && tasks.len() < max_in_flight {
                if options.cancel.load(Ordering::Relaxed) {
                    tracing::info!("sync cancelled; draining outstanding files");
                    cancelled = true;
                    break;
                }
                let Some(file) = queue.next() else {
                    break;
                };
                let inference = Arc::clone(&self.inference);
                let profile = self.config.profile;
                tasks.spawn(async move {
                    let file_started = Instant::now();
                    let rows = build_rows(&inference, &file).await;
                    if profile {
                        tracing::info!(
                            "indexed {} in {:?}",
                            file.rel_path,
                            file_started.elapsed()
                        );
                    }
                    (file, rows)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            processed += 1;

            let (file, rows) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("indexing task failed: {e}");
                    report.errors += 1;
                    continue;
                }
            };

            on_progress(SyncProgress {
                phase: SyncPhase::Index,
                processed,
                total,
                current_path: Some(file.rel_path.clone()),
            });

            match rows {
                Ok(rows) if rows.is_empty() => {
                    // nothing indexable left in this file
                    self.store_delete(&file.rel_path).await?;
                    meta_store.delete(&file.abs_path);
                }
                Ok(rows) => {
                    // delete always precedes add for a path, so replacing
                    // a file's chunk set stays atomic per path
                    self.store_delete(&file.rel_path).await?;
                    buffer.extend(rows);
                    meta_store.set(&file.abs_path, file.hash.clone());
                    report.indexed += 1;
                    if buffer.len() >= ROW_FLUSH_SIZE {
                        self.store_add(std::mem::take(&mut buffer)).await?;
                    }
                }
                Err(e) => {
                    tracing::warn!("skipping {}: {e}", file.rel_path);
                    report.errors += 1;
                }
            }
        }

        if !buffer.is_empty() {
            self.store_add(buffer).await?;
        }

        // ── Finalize ─────────────────────────────────────────────
        on_progress(SyncProgress {
            phase: SyncPhase::Finalize,
            processed: total,
            total,
            current_path: None,
        });

        if !cancelled {
            let store = Arc::clone(&self.store);
            run_blocking(move || {
                store.create_fts_index()?;
                store.create_vector_index()
            })
            .await?;
        }

        meta_store.save()?;
        lock.release();

        tracing::info!(
            "sync finished in {:?}: {} scanned, {} indexed, {} stale, {} errors",
            started.elapsed(),
            report.scanned,
            report.indexed,
            report.stale,
            report.errors
        );
        Ok(report)
    }

    async fn store_add(&self, rows: Vec<ChunkRow>) -> Result<()> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.add(rows)).await
    }

    async fn store_delete(&self, path: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let path = path.to_string();
        run_blocking(move || store.delete_path(&path)).await
    }

    async fn store_paths(&self) -> Result<Vec<String>> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.paths()).await
    }
}

/// Store calls commit tantivy segments; keep them off the reactor.
async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// Chunk one file and embed its windows; returns assembled rows.
async fn build_rows(inference: &Arc<dyn Inference>, file: &PendingFile) -> Result<Vec<ChunkRow>> {
    let Some(chunked) = chunking::chunk_file(Path::new(&file.rel_path), &file.text) else {
        return Ok(Vec::new());
    };

    let mut texts: Vec<String> = Vec::with_capacity(chunked.body.len() + 1);
    texts.push(chunked.anchor.content.clone());
    texts.extend(chunked.body.iter().map(|c| c.content.clone()));

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH_SIZE) {
        vectors.extend(inference.embed_batch(batch.to_vec()).await?);
    }
    if vectors.len() != texts.len() {
        return Err(Error::Model(format!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }
    for vector in &vectors {
        if vector.len() != EMBED_DIM {
            return Err(Error::DimensionMismatch {
                got: vector.len(),
                want: EMBED_DIM,
            });
        }
    }

    let mut vectors = vectors.into_iter();
    let mut rows = Vec::with_capacity(texts.len());

    rows.push(ChunkRow {
        id: Uuid::new_v4().to_string(),
        path: file.rel_path.clone(),
        hash: file.hash.clone(),
        content: chunked.anchor.content.clone(),
        start_line: chunked.anchor.start_line as u32,
        end_line: chunked.anchor.end_line as u32,
        chunk_index: 0,
        is_anchor: true,
        context_prev: String::new(),
        context_next: String::new(),
        vector: vectors.next().expect("one vector per text"),
    });

    for (i, chunk) in chunked.body.iter().enumerate() {
        let context_prev = if i > 0 {
            chunked.body[i - 1].content.clone()
        } else {
            String::new()
        };
        let context_next = chunked
            .body
            .get(i + 1)
            .map(|c| c.content.clone())
            .unwrap_or_default();

        rows.push(ChunkRow {
            id: Uuid::new_v4().to_string(),
            path: file.rel_path.clone(),
            hash: file.hash.clone(),
            content: chunk.content.clone(),
            start_line: chunk.start_line as u32,
            end_line: chunk.end_line as u32,
            chunk_index: (i + 1) as u32,
            is_anchor: false,
            context_prev,
            context_next,
            vector: vectors.next().expect("one vector per text"),
        });
    }

    Ok(rows)
}

fn rel_of(root: &Path, abs: &Path) -> String {
    abs.strip_prefix(root)
        .unwrap_or(abs)
        .to_string_lossy()
        .replace('\\', "/")
}
