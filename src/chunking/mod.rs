//! Structure-aware chunking: AST windows for supported languages,
//! paragraph fallback for the rest, plus one anchor chunk per file.

pub mod ast;
pub mod fallback;

use std::path::Path;

use crate::config::ANCHOR_MAX_LINES;

/// A contiguous text window from one file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    /// 1-based start line in the original file.
    pub start_line: usize,
    /// 1-based end line in the original file.
    pub end_line: usize,
}

/// Chunker output: the per-file anchor plus ordered body chunks.
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub anchor: Chunk,
    pub body: Vec<Chunk>,
}

/// Languages with tree-sitter grammar support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Unknown,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" => Language::JavaScript,
            "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            _ => Language::Unknown,
        }
    }

    /// The tree-sitter grammar for this variant, or None if unsupported.
    pub fn grammar(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::Unknown => None,
        }
    }
}

/// Split one file into an anchor chunk plus body chunks.
///
/// Parser failures are non-fatal: the file drops to the paragraph
/// splitter. Returns None only for files with no non-whitespace content.
pub fn chunk_file(path: &Path, text: &str) -> Option<ChunkedFile> {
    if text.trim().is_empty() {
        return None;
    }

    let anchor = anchor_chunk(text);

    let language = Language::from_path(path);
    let body = ast::chunk_declarations(text, language)
        .unwrap_or_else(|| fallback::chunk_paragraphs(text));

    Some(ChunkedFile { anchor, body })
}

/// Synthesize the whole-file summary window from the file head.
///
/// Guarantees file-level recall for queries that hit top-of-file
/// identifiers (imports, module docs) even when no body chunk matches.
fn anchor_chunk(text: &str) -> Chunk {
    let lines: Vec<&str> = text.lines().collect();
    let end = lines.len().min(ANCHOR_MAX_LINES);
    Chunk {
        content: lines[..end].join("\n"),
        start_line: 1,
        end_line: end.max(1),
    }
}
