//! Paragraph fallback for files without a grammar (or whose parse failed).
//!
//! Splits at blank lines, merges small paragraphs up to the window caps,
//! and splits oversized paragraphs at single line boundaries.

use super::Chunk;

/// Soft window cap in lines.
const MAX_LINES: usize = 60;

/// Soft window cap in non-whitespace characters.
const MAX_CHARS: usize = 1024;

/// Chunk content at blank-line paragraph boundaries.
pub fn chunk_paragraphs(content: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let paragraphs = split_at_blank_lines(&lines);

    let mut chunks = Vec::new();
    // (start_row, end_row, chars) of the window being assembled.
    let mut acc: Option<(usize, usize, usize)> = None;

    for (start, end) in paragraphs {
        let chars = non_ws_chars(&lines, start, end);

        if chars > MAX_CHARS || end - start + 1 > MAX_LINES {
            if let Some((astart, aend, _)) = acc.take() {
                chunks.push(window(&lines, astart, aend));
            }
            split_by_lines(&lines, start, end, &mut chunks);
            continue;
        }

        acc = Some(match acc.take() {
            None => (start, end, chars),
            Some((astart, aend, achars)) => {
                if achars + chars > MAX_CHARS || end - astart + 1 > MAX_LINES {
                    chunks.push(window(&lines, astart, aend));
                    (start, end, chars)
                } else {
                    (astart, end, achars + chars)
                }
            }
        });
    }

    if let Some((astart, aend, _)) = acc {
        chunks.push(window(&lines, astart, aend));
    }

    chunks
}

/// (start_row, end_row) per blank-line-separated paragraph.
fn split_at_blank_lines(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut paragraphs = Vec::new();
    let mut start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push((s, i - 1));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        paragraphs.push((s, lines.len() - 1));
    }

    paragraphs
}

/// Split one oversized paragraph at single line boundaries.
fn split_by_lines(lines: &[&str], start: usize, end: usize, chunks: &mut Vec<Chunk>) {
    let mut piece_start = start;
    let mut chars = 0usize;

    for i in start..=end {
        let line_chars = lines[i].chars().filter(|c| !c.is_whitespace()).count();
        let over = chars + line_chars > MAX_CHARS || i - piece_start + 1 > MAX_LINES;
        if over && i > piece_start {
            chunks.push(window(lines, piece_start, i - 1));
            piece_start = i;
            chars = line_chars;
        } else {
            chars += line_chars;
        }
    }

    if piece_start <= end {
        chunks.push(window(lines, piece_start, end));
    }
}

fn window(lines: &[&str], start: usize, end: usize) -> Chunk {
    Chunk {
        content: lines[start..=end].join("\n"),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content() {
        assert!(chunk_paragraphs("").is_empty());
        assert!(chunk_paragraphs("  \n\n  ").is_empty());
    }

    #[test]
    fn test_small_file_is_one_chunk() {
        let chunks = chunk_paragraphs("one\ntwo\nthree");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_small_paragraphs_merge() {
        let chunks = chunk_paragraphs("hello\n\nworld\n");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("hello"));
        assert!(chunks[0].content.contains("world"));
    }

    #[test]
    fn test_large_paragraphs_split() {
        let p1: String = (0..70)
            .map(|i| format!("alpha line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let p2: String = (0..70)
            .map(|i| format!("beta line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_paragraphs(&format!("{p1}\n\n{p2}"));
        assert!(chunks.len() >= 2, "got {} chunks", chunks.len());
    }

    #[test]
    fn test_oversized_paragraph_splits_by_lines() {
        let paragraph: String = (0..200)
            .map(|i| format!("word{i} word{i} word{i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_paragraphs(&paragraph);
        assert!(chunks.len() > 1);
        // pieces tile the paragraph without gaps
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn test_line_numbers_one_based() {
        let chunks = chunk_paragraphs("a\nb");
        assert_eq!(chunks[0].start_line, 1);
    }
}
