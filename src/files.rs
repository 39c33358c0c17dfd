//! Candidate-file enumeration for a sync.
//!
//! Ignore-file parsing (`.gitignore`, `.osgrepignore`) belongs to the
//! caller; it hands the walker extra [`IgnoreRules`]. The walker itself
//! only applies the built-in skip sets: hidden entries, dependency and
//! build directories, oversized files, and non-text extensions.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Files larger than this are never indexed.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// A candidate file discovered during enumeration.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    /// Path relative to the walked root, with `/` separators.
    pub rel_path: String,
}

/// Caller-supplied ignore predicates, applied to absolute paths.
#[derive(Default)]
pub struct IgnoreRules {
    rules: Vec<Box<dyn Fn(&Path) -> bool + Send + Sync>>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: impl Fn(&Path) -> bool + Send + Sync + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.rules.iter().any(|rule| rule(path))
    }
}

/// Walk `root` and return indexable files in sorted order.
pub fn walk_project(root: &Path, ignore: &IgnoreRules) -> Vec<WalkedFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.path() == root || !is_skipped_entry(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_indexable_file(path) || ignore.matches(path) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }

        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        files.push(WalkedFile {
            abs_path: path.to_path_buf(),
            rel_path,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files
}

fn is_skipped_entry(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    matches!(
        name.as_ref(),
        "node_modules"
            | "target"
            | "dist"
            | "build"
            | "out"
            | "__pycache__"
            | "vendor"
            | "venv"
            | "env"
    )
}

/// Extension-based text/binary split, plus well-known extensionless names.
pub fn is_indexable_file(path: &Path) -> bool {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if matches!(
        filename.as_ref(),
        "makefile" | "dockerfile" | "rakefile" | "gemfile" | "readme" | "license"
    ) {
        return true;
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    matches!(
        ext.as_str(),
        "rs" | "py"
            | "js"
            | "jsx"
            | "ts"
            | "tsx"
            | "go"
            | "java"
            | "c"
            | "cc"
            | "cpp"
            | "h"
            | "hpp"
            | "cs"
            | "rb"
            | "php"
            | "swift"
            | "kt"
            | "scala"
            | "lua"
            | "sh"
            | "bash"
            | "zsh"
            | "sql"
            | "html"
            | "css"
            | "scss"
            | "json"
            | "yaml"
            | "yml"
            | "toml"
            | "ini"
            | "cfg"
            | "md"
            | "rst"
            | "txt"
            | "proto"
            | "graphql"
            | "vue"
            | "svelte"
            | "zig"
            | "ex"
            | "exs"
            | "hs"
            | "ml"
            | "clj"
            | "tf"
            | "nix"
            | "dart"
    )
}
