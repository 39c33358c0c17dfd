//! Fleet of isolated inference processes with request multiplexing,
//! crash recovery, and memory-pressure recycling.
//!
//! Tasks queue FIFO and go to the first idle worker; a worker runs one
//! task at a time because model state in the worker is not re-entrant.
//! A request that exceeds the timeout kills its worker (the model may be
//! stuck) and a replacement is spawned; the same happens when a worker
//! exits on its own or grows past the resident-set limit.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::Inference;
use crate::worker::proto::{WorkerMethod, WorkerRequest, WorkerResponse, WorkerResult};

const QUEUE_CAPACITY: usize = 64;
const RESPAWN_BACKOFF: Duration = Duration::from_millis(500);
const DESTROY_WAIT: Duration = Duration::from_secs(5);

struct Task {
    method: WorkerMethod,
    reply: oneshot::Sender<Result<WorkerResult>>,
}

struct Shared {
    closed: AtomicBool,
    respawns: AtomicUsize,
    request_seq: AtomicU64,
    timeout: Duration,
    memory_limit: u64,
    worker_bin: Option<PathBuf>,
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    shared: Arc<Shared>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(config: &Config) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Task>(QUEUE_CAPACITY);
        let queue = Arc::new(Mutex::new(rx));

        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            respawns: AtomicUsize::new(0),
            request_seq: AtomicU64::new(0),
            timeout: config.worker_timeout,
            memory_limit: config.worker_memory_limit,
            worker_bin: config.worker_bin.clone(),
        });

        let mut handles = Vec::with_capacity(config.worker_count);
        for idx in 0..config.worker_count {
            handles.push(tokio::spawn(worker_loop(
                idx,
                Arc::clone(&queue),
                Arc::clone(&shared),
            )));
        }

        Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Workers respawned after a crash, timeout, or memory recycle.
    pub fn respawn_count(&self) -> usize {
        self.shared.respawns.load(Ordering::Relaxed)
    }

    async fn submit(&self, method: WorkerMethod) -> Result<WorkerResult> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        let sender = self.sender.lock().await.clone();
        let Some(sender) = sender else {
            return Err(Error::PoolClosed);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Task {
                method,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::PoolClosed)?;

        reply_rx
            .await
            .map_err(|_| Error::WorkerCrash("task dropped during pool shutdown".to_string()))?
    }

    /// Close the pool: reject the queue, signal workers, wait bounded.
    pub async fn destroy(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.sender.lock().await.take();

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DESTROY_WAIT, handle).await.is_err() {
                // kill_on_drop reaps the child when the loop is aborted
                abort.abort();
            }
        }
    }
}

async fn worker_loop(idx: usize, queue: Arc<Mutex<mpsc::Receiver<Task>>>, shared: Arc<Shared>) {
    'respawn: while !shared.closed.load(Ordering::SeqCst) {
        let mut child = match spawn_worker(&shared) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("worker {idx}: spawn failed: {e}");
                tokio::time::sleep(RESPAWN_BACKOFF).await;
                continue;
            }
        };
        let pid = child.id().unwrap_or(0);
        let mut stdin = child.stdin.take().expect("worker stdin is piped");
        let mut lines = BufReader::new(child.stdout.take().expect("worker stdout is piped")).lines();
        tracing::info!("worker {idx} ready (pid {pid})");

        loop {
            let task = {
                let mut rx = queue.lock().await;
                rx.recv().await
            };
            let Some(task) = task else {
                // queue closed: pool is being destroyed
                let _ = child.start_kill();
                break 'respawn;
            };

            let id = shared.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
            let method_name = task.method.name();
            let request = WorkerRequest {
                id,
                method: task.method,
            };
            let mut line = match serde_json::to_string(&request) {
                Ok(line) => line,
                Err(e) => {
                    let _ = task
                        .reply
                        .send(Err(Error::WorkerProtocol(format!("encode failed: {e}"))));
                    continue;
                }
            };
            line.push('\n');

            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                let _ = task.reply.send(Err(Error::WorkerCrash(format!(
                    "worker pid {pid} rejected {method_name}: {e}"
                ))));
                respawn(idx, &shared, &mut child, "write failure").await;
                continue 'respawn;
            }

            match tokio::time::timeout(shared.timeout, lines.next_line()).await {
                Err(_) => {
                    let _ = task
                        .reply
                        .send(Err(Error::WorkerTimeout(shared.timeout.as_millis() as u64)));
                    respawn(idx, &shared, &mut child, "timeout").await;
                    continue 'respawn;
                }
                Ok(Ok(Some(reply_line))) => {
                    match serde_json::from_str::<WorkerResponse>(&reply_line) {
                        Ok(response) if response.id == id => {
                            let outcome = match (response.result, response.error) {
                                (Some(result), None) => Ok(result),
                                (_, Some(message)) => Err(Error::Model(message)),
                                (None, None) => Err(Error::WorkerProtocol(
                                    "response carries neither result nor error".to_string(),
                                )),
                            };
                            let _ = task.reply.send(outcome);
                        }
                        Ok(response) => {
                            let _ = task.reply.send(Err(Error::WorkerProtocol(format!(
                                "response id {} does not match request id {id}",
                                response.id
                            ))));
                            respawn(idx, &shared, &mut child, "id mismatch").await;
                            continue 'respawn;
                        }
                        Err(e) => {
                            let _ = task.reply.send(Err(Error::WorkerProtocol(format!(
                                "unparseable response: {e}"
                            ))));
                            respawn(idx, &shared, &mut child, "bad response").await;
                            continue 'respawn;
                        }
                    }
                }
                Ok(Ok(None)) | Ok(Err(_)) => {
                    let _ = task.reply.send(Err(Error::WorkerCrash(format!(
                        "worker pid {pid} exited during {method_name}"
                    ))));
                    respawn(idx, &shared, &mut child, "unexpected exit").await;
                    continue 'respawn;
                }
            }

            if let Some(rss) = resident_bytes(pid) {
                if rss > shared.memory_limit {
                    tracing::info!(
                        "worker {idx} rss {} MB over limit, recycling",
                        rss / (1024 * 1024)
                    );
                    respawn(idx, &shared, &mut child, "memory pressure").await;
                    continue 'respawn;
                }
            }
        }
    }
}

async fn respawn(idx: usize, shared: &Shared, child: &mut Child, reason: &str) {
    let _ = child.kill().await;
    if !shared.closed.load(Ordering::SeqCst) {
        shared.respawns.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("worker {idx} replaced ({reason})");
    }
}

fn spawn_worker(shared: &Shared) -> std::io::Result<Child> {
    let bin = match &shared.worker_bin {
        Some(path) => path.clone(),
        None => std::env::current_exe()?,
    };
    Command::new(bin)
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
}

fn resident_bytes(pid: u32) -> Option<u64> {
    if pid == 0 {
        return None;
    }
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).map(|p| p.memory())
}

#[async_trait]
impl Inference for WorkerPool {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        match self.submit(WorkerMethod::ProcessFile { texts }).await? {
            WorkerResult::Embeddings { vectors } => Ok(vectors),
            other => Err(Error::WorkerProtocol(format!(
                "expected embeddings, got {other:?}"
            ))),
        }
    }

    async fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        let method = WorkerMethod::EncodeQuery {
            text: text.to_string(),
        };
        match self.submit(method).await? {
            WorkerResult::QueryVector { vector } => Ok(vector),
            other => Err(Error::WorkerProtocol(format!(
                "expected query vector, got {other:?}"
            ))),
        }
    }

    async fn rerank(&self, query: &str, docs: Vec<String>) -> Result<Vec<f32>> {
        let method = WorkerMethod::Rerank {
            query: query.to_string(),
            docs,
        };
        match self.submit(method).await? {
            WorkerResult::Scores { scores } => Ok(scores),
            other => Err(Error::WorkerProtocol(format!(
                "expected scores, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_destroyed_pool_rejects_tasks() {
        let config = Config {
            worker_count: 1,
            worker_bin: Some(PathBuf::from("/nonexistent/osgrep")),
            ..Config::default()
        };
        let pool = WorkerPool::start(&config);
        pool.destroy().await;

        let err = pool.encode_query("q").await.unwrap_err();
        assert!(matches!(err, Error::PoolClosed));
    }

    #[tokio::test]
    async fn test_respawn_count_starts_at_zero() {
        let config = Config {
            worker_count: 1,
            worker_bin: Some(PathBuf::from("/nonexistent/osgrep")),
            ..Config::default()
        };
        let pool = WorkerPool::start(&config);
        assert_eq!(pool.respawn_count(), 0);
        pool.destroy().await;
    }
}
