//! Worker pool integration tests against the real binary in worker mode.
//!
//! Cargo exposes the built binary path as `CARGO_BIN_EXE_osgrep`; the
//! workers run with fake models so no artifacts are needed.

use std::path::PathBuf;
use std::time::Duration;

use osgrep::config::{Config, EMBED_DIM};
use osgrep::model::Inference;
use osgrep::worker::WorkerPool;

fn pool_config(workers: usize) -> Config {
    Config {
        worker_count: workers,
        worker_bin: Some(PathBuf::from(env!("CARGO_BIN_EXE_osgrep"))),
        ..Config::default()
    }
}

// The spawned workers read OSGREP_FAKE_MODELS from the inherited
// environment; set it for the whole test process.
fn force_fake_models() {
    std::env::set_var("OSGREP_FAKE_MODELS", "1");
}

#[tokio::test]
async fn test_embed_roundtrip_through_worker() {
    force_fake_models();
    let pool = WorkerPool::start(&pool_config(2));

    let vectors = pool
        .embed_batch(vec!["fn main() {}".to_string(), "hello world".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0].len(), EMBED_DIM);
    assert_ne!(vectors[0], vectors[1]);

    pool.destroy().await;
}

#[tokio::test]
async fn test_encode_query_differs_from_document_embedding() {
    force_fake_models();
    let pool = WorkerPool::start(&pool_config(1));

    let doc = pool
        .embed_batch(vec!["find the parser".to_string()])
        .await
        .unwrap();
    let query = pool.encode_query("find the parser").await.unwrap();
    // the instruction prefix must change the vector
    assert_ne!(doc[0], query);

    pool.destroy().await;
}

#[tokio::test]
async fn test_rerank_through_worker() {
    force_fake_models();
    let pool = WorkerPool::start(&pool_config(1));

    let scores = pool
        .rerank(
            "database connection",
            vec![
                "fn connect_database(url: &str)".to_string(),
                "completely unrelated text".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(scores.len(), 2);
    assert!(scores[0] > scores[1]);

    pool.destroy().await;
}

#[tokio::test]
async fn test_worker_crash_respawns_and_pool_recovers() {
    force_fake_models();

    // Give this test its own uniquely named binary so killing its worker
    // cannot hit the workers of concurrently running tests.
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("osgrep-crash-probe");
    std::fs::copy(env!("CARGO_BIN_EXE_osgrep"), &bin).unwrap();

    let config = Config {
        worker_count: 1,
        worker_bin: Some(bin),
        ..Config::default()
    };
    let pool = WorkerPool::start(&config);

    // warm up so the worker exists
    pool.encode_query("warmup").await.unwrap();

    // kill the worker out from under the pool
    let _ = std::process::Command::new("pkill")
        .args(["-f", "osgrep-crash-probe worker"])
        .status();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The crash is detected on the next interaction; that one request may
    // be rejected, after which the respawned worker serves again.
    let mut vector = None;
    for _ in 0..5 {
        match pool.encode_query("after the crash").await {
            Ok(v) => {
                vector = Some(v);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
    let vector = vector.expect("pool should recover after a worker crash");
    assert_eq!(vector.len(), EMBED_DIM);
    assert!(pool.respawn_count() >= 1, "expected at least one respawn");

    pool.destroy().await;
}

#[tokio::test]
async fn test_destroy_then_submit_rejects() {
    force_fake_models();
    let pool = WorkerPool::start(&pool_config(1));
    pool.destroy().await;
    assert!(pool.encode_query("late").await.is_err());
}
