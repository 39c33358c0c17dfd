//! Content digests and the `path → hash` meta-store.
//!
//! The meta-store is the authoritative change-detection source: the syncer
//! compares each candidate file's digest against it to decide whether the
//! file must be (re-)embedded. It lives outside the vector store as a
//! single flat JSON file, rewritten whole on save.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Stable, collision-resistant content digest (SHA-256, hex-encoded).
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Atomic whole-file write: write a temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Persistent map from absolute file path to content digest.
/// Keys stay sorted so saves serialize byte-identically run to run.
pub struct MetaStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl MetaStore {
    /// Load the meta-store from disk. A missing file yields an empty map;
    /// a corrupt file yields an empty map and a warning.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(
                        "meta-store at {} is corrupt ({e}); starting empty",
                        path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.entries.get(&key(path)).map(String::as_str)
    }

    pub fn set(&mut self, path: &Path, hash: String) {
        self.entries.insert(key(path), hash);
    }

    pub fn delete(&mut self, path: &Path) {
        self.entries.remove(&key(path));
    }

    /// All tracked absolute paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Tracked paths under `root`.
    pub fn paths_under<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
        let root = key(root);
        self.entries
            .keys()
            .filter(move |p| Path::new(p).starts_with(&root))
            .map(PathBuf::from)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist the whole map with write-then-rename for crash safety.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, data.as_bytes())?;
        Ok(())
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
