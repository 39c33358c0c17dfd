use std::path::PathBuf;
use std::time::Duration;

/// Dense embedding dimension. Rows with any other dimension are rejected.
pub const EMBED_DIM: usize = 384;

/// Per-token dimension of the late-interaction reranker.
pub const COLBERT_DIM: usize = 48;

/// Texts per embedding request sent to a worker.
pub const EMBED_BATCH_SIZE: usize = 12;

/// Buffered rows are flushed to the store once this many accumulate.
pub const ROW_FLUSH_SIZE: usize = 500;

/// Candidates fetched from each retrieval arm before fusion.
pub const CANDIDATE_POOL: usize = 200;

/// Fused candidates passed to the neural reranker.
pub const RERANK_HEAD: usize = 50;

/// Reciprocal-rank-fusion constant.
pub const RRF_K: f32 = 20.0;

/// Below this row count a flat scan beats an IVF index and the
/// training step would fail, so `create_vector_index` is a no-op.
pub const VECTOR_INDEX_MIN_ROWS: usize = 256;

/// The anchor chunk covers at most this many lines of the file head.
pub const ANCHOR_MAX_LINES: usize = 40;

/// Runtime configuration, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// `~/.osgrep`: meta-store, model artifacts, and vector store data.
    pub home_dir: PathBuf,
    /// Store name; one store per indexed repository.
    pub store_name: String,
    /// Default port for the server shell.
    pub port: u16,
    /// Number of inference worker processes.
    pub worker_count: usize,
    /// Hard timeout per worker request.
    pub worker_timeout: Duration,
    /// Workers exceeding this resident-set size are drained and recycled.
    pub worker_memory_limit: u64,
    /// Binary spawned in worker mode. Defaults to the current executable;
    /// integration tests point this at the built `osgrep` binary.
    pub worker_bin: Option<PathBuf>,
    /// Directory holding the model artifacts (`embedder/`, `reranker/`).
    pub model_dir: PathBuf,
    /// Use deterministic hash models instead of loading artifacts.
    pub fake_models: bool,
    /// Emit per-file timing logs during sync.
    pub profile: bool,
    /// Gate for the experimental watch mode.
    pub enable_watch: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".osgrep");
        let model_dir = home_dir.join("models");
        Self {
            home_dir,
            store_name: "default".to_string(),
            port: 7878,
            worker_count: default_worker_count(),
            worker_timeout: Duration::from_millis(60_000),
            worker_memory_limit: 1_536 * 1024 * 1024,
            worker_bin: None,
            model_dir,
            fake_models: false,
            profile: false,
            enable_watch: false,
        }
    }
}

fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.clamp(1, 4)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("MXBAI_STORE") {
            if !name.is_empty() {
                config.store_name = name;
            }
        }
        if let Ok(port) = std::env::var("OSGREP_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(ms) = std::env::var("OSGREP_WORKER_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.worker_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(n) = std::env::var("OSGREP_WORKERS") {
            if let Ok(n) = n.parse::<usize>() {
                config.worker_count = n.max(1);
            }
        }
        if let Ok(bin) = std::env::var("OSGREP_WORKER_BIN") {
            config.worker_bin = Some(PathBuf::from(bin));
        }
        if let Ok(dir) = std::env::var("OSGREP_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        config.fake_models = env_flag("OSGREP_FAKE_MODELS");
        config.profile = env_flag("OSGREP_PROFILE");
        config.enable_watch = env_flag("OSGREP_ENABLE_WATCH");

        config
    }

    /// Root of all on-disk vector stores.
    pub fn data_dir(&self) -> PathBuf {
        self.home_dir.join("data")
    }

    /// Directory of the configured store.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir().join(&self.store_name)
    }

    /// The flat-file meta-store shared by all repositories.
    pub fn meta_path(&self) -> PathBuf {
        self.home_dir.join("meta.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_bounded() {
        let config = Config::default();
        assert!(config.worker_count >= 1);
        assert!(config.worker_count <= 4);
    }

    #[test]
    fn test_store_dir_under_data_dir() {
        let config = Config {
            store_name: "myrepo".to_string(),
            ..Config::default()
        };
        assert!(config.store_dir().ends_with("data/myrepo"));
    }

    #[test]
    fn test_meta_path_under_home() {
        let config = Config::default();
        assert_eq!(config.meta_path(), config.home_dir.join("meta.json"));
    }
}
