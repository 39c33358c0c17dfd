//! Declaration-level chunking via tree-sitter.
//!
//! Each top-level declaration (function, class, impl block, …) becomes one
//! chunk; consecutive module-level statements are grouped into a block.
//! Comments immediately preceding a declaration are attached to it.
//! Declarations exceeding the window cap are split along child boundaries.
//!
//! Falls back (returns None) when:
//! - the language has no grammar
//! - the file exceeds MAX_FILE_SIZE
//! - the parse produces >30% error nodes

use super::{Chunk, Language};

/// Soft window cap in lines.
const MAX_LINES: usize = 60;

/// Soft window cap in non-whitespace characters.
const MAX_CHARS: usize = 1024;

/// Files larger than this skip AST parsing entirely.
const MAX_FILE_SIZE: usize = 500 * 1024;

/// If more than this fraction of nodes are error nodes, fall back.
const ERROR_THRESHOLD: f64 = 0.30;

/// Chunk source at declaration boundaries. None means "use the fallback".
pub fn chunk_declarations(content: &str, language: Language) -> Option<Vec<Chunk>> {
    let grammar = language.grammar()?;
    if content.len() > MAX_FILE_SIZE {
        return None;
    }

    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let (total, errors) = count_nodes(root);
    if total > 0 && (errors as f64 / total as f64) > ERROR_THRESHOLD {
        tracing::warn!(
            "parse error rate {:.0}% exceeds threshold, using paragraph fallback",
            (errors as f64 / total as f64) * 100.0
        );
        return None;
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    // Start row of a comment run awaiting its declaration.
    let mut pending_comment: Option<usize> = None;
    // (start_row, end_row, chars) of the current statement block.
    let mut block: Option<(usize, usize, usize)> = None;

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind().contains("comment") {
            pending_comment.get_or_insert(child.start_position().row);
            continue;
        }

        let start = pending_comment
            .take()
            .unwrap_or(child.start_position().row);
        let end = child.end_position().row;

        if is_declaration(child.kind()) {
            flush_block(&lines, &mut block, &mut chunks);
            if oversize(&lines, start, end) {
                split_along_children(&lines, child, start, &mut chunks);
            } else {
                chunks.push(window(&lines, start, end));
            }
        } else if oversize(&lines, start, end) {
            flush_block(&lines, &mut block, &mut chunks);
            split_along_children(&lines, child, start, &mut chunks);
        } else {
            let chars = non_ws_chars(&lines, child.start_position().row, end);
            block = Some(match block.take() {
                None => (start, end, chars),
                Some((bs, _, bc)) => {
                    if bc + chars > MAX_CHARS || end.saturating_sub(bs) + 1 > MAX_LINES {
                        chunks.push(window(&lines, bs, prev_row(&lines, start)));
                        (start, end, chars)
                    } else {
                        (bs, end, bc + chars)
                    }
                }
            });
        }
    }
    flush_block(&lines, &mut block, &mut chunks);

    // Tree-sitter can parse an all-whitespace file to an empty root;
    // hand that to the fallback too.
    if chunks.is_empty() {
        return None;
    }
    Some(chunks)
}

/// Recursively split a node exceeding the caps along its child boundaries.
/// `lead_start` carries attached comment rows into the first piece.
fn split_along_children(
    lines: &[&str],
    node: tree_sitter::Node,
    lead_start: usize,
    chunks: &mut Vec<Chunk>,
) {
    let mut cursor = node.walk();
    let children: Vec<tree_sitter::Node> = node.children(&mut cursor).collect();

    if children.is_empty() {
        // Oversized leaf, emit as-is.
        chunks.push(window(lines, lead_start, node.end_position().row));
        return;
    }

    let mut acc: Option<(usize, usize, usize)> = None;
    let mut lead = Some(lead_start);

    for child in children {
        let start = lead.take().unwrap_or(child.start_position().row);
        let end = child.end_position().row;
        let chars = non_ws_chars(lines, child.start_position().row, end);

        if oversize(lines, start, end) {
            flush_block(lines, &mut acc, chunks);
            split_along_children(lines, child, start, chunks);
            continue;
        }

        acc = Some(match acc.take() {
            None => (start, end, chars),
            Some((astart, _, achars)) => {
                if achars + chars > MAX_CHARS || end.saturating_sub(astart) + 1 > MAX_LINES {
                    chunks.push(window(lines, astart, prev_row(lines, start)));
                    (start, end, chars)
                } else {
                    (astart, end, achars + chars)
                }
            }
        });
    }
    flush_block(lines, &mut acc, chunks);
}

fn flush_block(lines: &[&str], block: &mut Option<(usize, usize, usize)>, chunks: &mut Vec<Chunk>) {
    if let Some((start, end, _)) = block.take() {
        chunks.push(window(lines, start, end));
    }
}

/// End the previous window at the row before `next_start`, guarding
/// against adjacent nodes on the same row.
fn prev_row(_lines: &[&str], next_start: usize) -> usize {
    next_start.saturating_sub(1)
}

fn is_declaration(kind: &str) -> bool {
    matches!(
        kind,
        // Rust
        "function_item"
            | "struct_item"
            | "enum_item"
            | "impl_item"
            | "trait_item"
            | "mod_item"
            | "macro_definition"
            | "union_item"
            | "foreign_mod_item"
            // JavaScript / TypeScript
            | "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "abstract_class_declaration"
            | "interface_declaration"
            | "enum_declaration"
            | "type_alias_declaration"
            | "internal_module"
            | "export_statement"
            | "method_definition"
    )
}

fn oversize(lines: &[&str], start: usize, end: usize) -> bool {
    end.saturating_sub(start) + 1 > MAX_LINES || non_ws_chars(lines, start, end) > MAX_CHARS
}

fn window(lines: &[&str], start: usize, end: usize) -> Chunk {
    let end = end.min(lines.len().saturating_sub(1)).max(start);
    let content = lines[start..=end].join("\n");
    Chunk {
        content,
        start_line: start + 1,
        end_line: end + 1,
    }
}

fn non_ws_chars(lines: &[&str], start: usize, end: usize) -> usize {
    (start..=end)
        .filter_map(|i| lines.get(i))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .count()
}

fn count_nodes(node: tree_sitter::Node) -> (usize, usize) {
    let mut total = 1usize;
    let mut errors = usize::from(node.is_error());

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let (t, e) = count_nodes(child);
        total += t;
        errors += e;
    }

    (total, errors)
}
