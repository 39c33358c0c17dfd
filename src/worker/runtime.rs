//! The worker-side request loop, run when the binary starts in worker mode.
//!
//! stdout carries the protocol, so all logging goes to stderr. Models are
//! a process-local singleton, loaded lazily on the first task: spawning
//! the fleet stays cheap and a worker that only ever embeds never pays
//! for the reranker.

use std::io::{BufRead, Write};

use crate::config::Config;
use crate::error::Result;
use crate::model::LocalInference;
use crate::worker::proto::{WorkerMethod, WorkerRequest, WorkerResponse, WorkerResult};

pub fn run() -> Result<()> {
    let config = Config::from_env();
    let mut models: Option<LocalInference> = None;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => handle(&config, &mut models, request),
            Err(e) => WorkerResponse {
                id: 0,
                result: None,
                error: Some(format!("malformed request: {e}")),
            },
        };

        serde_json::to_writer(&mut out, &response)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }

    // EOF: the pool closed our stdin; exit quietly.
    Ok(())
}

fn handle(
    config: &Config,
    models: &mut Option<LocalInference>,
    request: WorkerRequest,
) -> WorkerResponse {
    let outcome = ensure_models(config, models).and_then(|inference| {
        match request.method {
            WorkerMethod::ProcessFile { texts } => inference
                .embed_batch_sync(&texts)
                .map(|vectors| WorkerResult::Embeddings { vectors }),
            WorkerMethod::EncodeQuery { text } => inference
                .encode_query_sync(&text)
                .map(|vector| WorkerResult::QueryVector { vector }),
            WorkerMethod::Rerank { query, docs } => inference
                .rerank_sync(&query, &docs)
                .map(|scores| WorkerResult::Scores { scores }),
        }
    });

    match outcome {
        Ok(result) => WorkerResponse {
            id: request.id,
            result: Some(result),
            error: None,
        },
        Err(e) => WorkerResponse {
            id: request.id,
            result: None,
            error: Some(e.to_string()),
        },
    }
}

fn ensure_models<'a>(
    config: &Config,
    models: &'a mut Option<LocalInference>,
) -> Result<&'a LocalInference> {
    if models.is_none() {
        tracing::info!("loading models in worker pid {}", std::process::id());
        *models = Some(LocalInference::from_config(config)?);
    }
    Ok(models.as_ref().expect("just initialized"))
}
