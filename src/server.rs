//! The long-running server shell: initial sync to readiness, then
//! `/search` and `/health` over HTTP, with optional watch-triggered
//! re-syncs and graceful shutdown on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::{Config, EMBED_DIM};
use crate::meta::write_atomic;
use crate::model::Inference;
use crate::models::{Filters, SearchRequest, SearchResponse};
use crate::search::Searcher;
use crate::store::{DiskStore, Store};
use crate::sync::{SyncOptions, Syncer};
use crate::watch;
use crate::worker::WorkerPool;

/// Bodies above this size are rejected with `413 payload_too_large`.
const MAX_BODY_BYTES: usize = 1_048_576;

#[derive(Clone)]
struct AppState {
    searcher: Arc<Searcher>,
    project_root: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerMarker {
    pid: u32,
    port: u16,
    started_at: String,
}

/// `<root>/.osgrep/server.json`, removed again on shutdown.
struct MarkerGuard {
    path: PathBuf,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_marker(project_root: &Path, port: u16) -> crate::error::Result<MarkerGuard> {
    let dir = project_root.join(".osgrep");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("server.json");
    let marker = ServerMarker {
        pid: std::process::id(),
        port,
        started_at: Utc::now().to_rfc3339(),
    };
    write_atomic(&path, serde_json::to_string_pretty(&marker)?.as_bytes())?;
    Ok(MarkerGuard { path })
}

/// Run the server until SIGINT/SIGTERM.
pub async fn serve(config: Config, project_root: PathBuf) -> anyhow::Result<()> {
    let project_root = project_root.canonicalize()?;

    let store: Arc<dyn Store> =
        Arc::new(DiskStore::open_or_create(&config.store_dir(), EMBED_DIM)?);
    let pool = WorkerPool::start(&config);
    let inference: Arc<dyn Inference> = pool.clone();
    let syncer = Syncer::new(config.clone(), Arc::clone(&store), Arc::clone(&inference));

    tracing::info!("initial sync of {}", project_root.display());
    let report = syncer
        .sync(&project_root, &SyncOptions::default(), |_| {})
        .await?;
    tracing::info!(
        "ready: {} files indexed ({} unchanged, {} errors)",
        report.indexed,
        report.unchanged,
        report.errors
    );

    let _watcher = if config.enable_watch {
        Some(spawn_watch_loop(project_root.clone(), syncer)?)
    } else {
        None
    };

    let state = AppState {
        searcher: Arc::new(Searcher::new(Arc::clone(&store), inference)),
        project_root: project_root.clone(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");

    let marker = write_marker(&project_root, config.port)?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    pool.destroy().await;
    if let Err(e) = store.close() {
        tracing::warn!("store close failed: {e}");
    }
    drop(marker);
    Ok(())
}

/// Re-run the sync whenever the watcher reports changes, collapsing
/// bursts into single runs.
fn spawn_watch_loop(root: PathBuf, syncer: Syncer) -> crate::error::Result<watch::Watcher> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = watch::watch(&root, tx)?;
    tracing::info!("watch mode enabled for {}", root.display());

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            while let Ok(Some(())) =
                tokio::time::timeout(Duration::from_millis(250), rx.recv()).await
            {
                // drain the burst
            }
            match syncer.sync(&root, &SyncOptions::default(), |_| {}).await {
                Ok(report) if report.indexed > 0 || report.stale > 0 => {
                    tracing::info!(
                        "watch sync: {} indexed, {} stale",
                        report.indexed,
                        report.stale
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("watch sync failed: {e}"),
            }
        }
    });

    Ok(watcher)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ─── Handlers ────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found")
}

async fn search(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let Ok(bytes) = body else {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large");
    };

    let request: SearchRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_request"),
    };

    let filters = match &request.path {
        None => None,
        Some(raw) => match resolve_path_filter(&state.project_root, raw) {
            Ok(prefix) => prefix.map(Filters::path_prefix),
            Err(()) => return error_response(StatusCode::BAD_REQUEST, "invalid_path"),
        },
    };

    match state
        .searcher
        .search(&request.query, request.limit, filters.as_ref())
        .await
    {
        Ok(results) => Json(SearchResponse { results }).into_response(),
        Err(e) => {
            tracing::error!("search failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "search_failed")
        }
    }
}

fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({"error": code}))).into_response()
}

/// Translate a request `path` into a repo-relative prefix filter.
///
/// The path (absolute, or relative to the project root) must resolve
/// inside the root after lexical normalization; escaping it is
/// `invalid_path`. The root itself means "no filter".
fn resolve_path_filter(project_root: &Path, raw: &str) -> Result<Option<String>, ()> {
    let requested = Path::new(raw);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        project_root.join(requested)
    };

    let normalized = normalize_lexically(&joined)?;
    let rel = normalized.strip_prefix(project_root).map_err(|_| ())?;
    let rel = rel.to_string_lossy().replace('\\', "/");

    if rel.is_empty() {
        Ok(None)
    } else {
        Ok(Some(rel))
    }
}

/// Resolve `.` and `..` without touching the filesystem: the filtered
/// directory does not have to exist.
fn normalize_lexically(path: &Path) -> Result<PathBuf, ()> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(());
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_subdirectory_allowed() {
        let root = Path::new("/repo");
        assert_eq!(
            resolve_path_filter(root, "src/sync").unwrap(),
            Some("src/sync".to_string())
        );
    }

    #[test]
    fn test_filter_root_itself_allowed() {
        let root = Path::new("/repo");
        assert_eq!(resolve_path_filter(root, ".").unwrap(), None);
        assert_eq!(resolve_path_filter(root, "/repo").unwrap(), None);
    }

    #[test]
    fn test_filter_sibling_rejected() {
        let root = Path::new("/repo");
        assert!(resolve_path_filter(root, "../sibling").is_err());
        assert!(resolve_path_filter(root, "/other/place").is_err());
    }

    #[test]
    fn test_filter_dotdot_inside_root_allowed() {
        let root = Path::new("/repo");
        assert_eq!(
            resolve_path_filter(root, "src/../docs").unwrap(),
            Some("docs".to_string())
        );
    }

    #[test]
    fn test_filter_sneaky_escape_rejected() {
        let root = Path::new("/repo");
        assert!(resolve_path_filter(root, "src/../../repo2").is_err());
    }

    #[test]
    fn test_normalize_pops_parent_dirs() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c")).unwrap(),
            PathBuf::from("/a/c")
        );
        assert!(normalize_lexically(Path::new("/..")).is_err());
    }
}
