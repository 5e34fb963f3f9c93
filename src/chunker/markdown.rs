//! Structure-aware Markdown splitting
//!
//! The first pass walks the document line by line and groups lines into
//! pieces: fenced code blocks and list items are atomic units, headings open
//! a section that keeps at least its first content with it, and over-long
//! lines are hard-split at whitespace. The second pass greedily merges
//! adjacent prose pieces up to the merge ceiling and re-splits anything above
//! it at blank lines.

use regex::Regex;
use std::sync::OnceLock;

/// Size limits applied by the splitter (bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Soft target for the structural pass
    pub max_chunk_bytes: usize,
    /// A heading section stops absorbing lines once it reaches this size
    pub heading_headroom: usize,
    /// Hard ceiling for every emitted chunk
    pub merge_ceiling: usize,
}

/// Hard upper bound on any chunk
pub const MAX_CHUNK_BYTES: usize = 8192;

const MIN_CEILING: usize = 256;

impl ChunkLimits {
    /// Sizes are clamped so no chunk can exceed [`MAX_CHUNK_BYTES`]
    pub fn new(max_chunk_bytes: usize, heading_headroom: usize, merge_ceiling: usize) -> Self {
        let max_chunk_bytes = max_chunk_bytes.clamp(1, MAX_CHUNK_BYTES);
        Self {
            max_chunk_bytes,
            heading_headroom: heading_headroom.min(max_chunk_bytes),
            merge_ceiling: merge_ceiling
                .max(max_chunk_bytes)
                .max(MIN_CEILING)
                .min(MAX_CHUNK_BYTES),
        }
    }

    /// Limits derived from a single size: headroom at 5/6 of it, ceiling at
    /// [`MAX_CHUNK_BYTES`]
    pub fn for_max(max_chunk_bytes: usize) -> Self {
        Self::new(max_chunk_bytes, max_chunk_bytes * 5 / 6, MAX_CHUNK_BYTES)
    }
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self::new(3000, 2500, MAX_CHUNK_BYTES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceKind {
    Prose,
    List,
}

#[derive(Debug)]
struct Piece {
    text: String,
    kind: PieceKind,
}

pub(crate) fn is_fence(stripped: &str) -> bool {
    stripped.starts_with("```")
}

fn is_heading(stripped: &str) -> bool {
    let hashes = stripped.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && stripped[hashes..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace)
}

fn ordered_marker() -> Option<&'static Regex> {
    static ORDERED: OnceLock<Option<Regex>> = OnceLock::new();
    ORDERED
        .get_or_init(|| Regex::new(r"^\d{1,9}[.)](\s|$)").ok())
        .as_ref()
}

pub(crate) fn is_list_item(stripped: &str) -> bool {
    stripped.starts_with("- ")
        || stripped.starts_with("* ")
        || stripped.starts_with("+ ")
        || ordered_marker().is_some_and(|re| re.is_match(stripped))
}

fn is_table_row(stripped: &str) -> bool {
    stripped.starts_with('|')
}

/// Largest char boundary not above `idx`
pub(crate) fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Where to cut an over-long line so the head fits in `budget` bytes
pub(crate) fn hard_split_point(s: &str, budget: usize) -> usize {
    let limit = floor_char_boundary(s, budget);
    if limit == 0 {
        // Budget smaller than the first character; take the character anyway
        return s.chars().next().map_or(s.len(), char::len_utf8);
    }
    match s[..limit].rfind(' ') {
        Some(pos) if pos >= budget / 3 && pos > 0 => pos,
        _ => limit,
    }
}

/// Index of the line closing the fence opened at `start`, or the last line
/// when the fence is never closed
fn fence_end(lines: &[&str], start: usize) -> usize {
    let mut in_code_fence = true;
    let mut j = start + 1;
    while j < lines.len() {
        if is_fence(lines[j].trim()) {
            in_code_fence = !in_code_fence;
        }
        if !in_code_fence {
            return j;
        }
        j += 1;
    }
    lines.len() - 1
}

/// Index of the last continuation line of the list item starting at `start`
fn list_item_end(lines: &[&str], start: usize) -> usize {
    let mut j = start;
    while j + 1 < lines.len() {
        let next = lines[j + 1];
        let stripped = next.trim();
        let indented = next.starts_with(' ') || next.starts_with('\t');
        if stripped.is_empty() || !indented || is_list_item(stripped) || is_fence(stripped) {
            break;
        }
        j += 1;
    }
    j
}

fn trim_blank_lines(text: &str) -> &str {
    let text = text.trim_end();
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            start += line.len();
        } else {
            break;
        }
    }
    &text[start..]
}

struct ChunkBuilder<'a> {
    limits: &'a ChunkLimits,
    pieces: Vec<Piece>,
    current: String,
    kind: PieceKind,
    has_content: bool,
    in_section: bool,
}

impl<'a> ChunkBuilder<'a> {
    fn new(limits: &'a ChunkLimits) -> Self {
        Self {
            limits,
            pieces: Vec::new(),
            current: String::new(),
            kind: PieceKind::Prose,
            has_content: false,
            in_section: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        if !self.current.is_empty() {
            self.current.push('\n');
        }
        self.current.push_str(line);
    }

    fn fits(&self, extra: usize) -> bool {
        self.current.trim().is_empty()
            || self.current.len() + 1 + extra <= self.limits.max_chunk_bytes
    }

    /// A heading with nothing under it yet must not be flushed on its own
    fn orphan_heading(&self) -> bool {
        self.in_section && !self.has_content
    }

    fn flush(&mut self) {
        let text = trim_blank_lines(&self.current);
        if !text.is_empty() {
            self.pieces.push(Piece {
                text: text.to_string(),
                kind: self.kind,
            });
        }
        self.current.clear();
        self.kind = PieceKind::Prose;
        self.has_content = false;
        self.in_section = false;
    }

    fn close_full_section(&mut self) {
        let full = self.current.len() >= self.limits.heading_headroom;
        if self.in_section && self.has_content && full {
            self.flush();
        }
    }

    fn start_section(&mut self, heading: &str) {
        if self.orphan_heading() {
            // Consecutive headings stay together with the content that follows
            self.push_line(heading);
            return;
        }
        self.flush();
        self.push_line(heading);
        self.in_section = true;
    }

    fn add_block(&mut self, block: &str) {
        self.close_full_section();
        if !self.fits(block.len()) && !self.orphan_heading() {
            self.flush();
        }
        self.push_line(block);
        self.has_content = true;
    }

    fn add_list_item(&mut self, item: &str) {
        self.close_full_section();
        if self.current.trim().is_empty() {
            self.kind = PieceKind::List;
        } else if !self.fits(item.len()) && !self.orphan_heading() {
            self.flush();
            self.kind = PieceKind::List;
        }
        self.push_line(item);
        self.has_content = true;
    }

    fn add_long_line(&mut self, line: &str) {
        if !self.orphan_heading() {
            self.flush();
        }
        let max = self.limits.max_chunk_bytes;
        let mut rest = line.trim_end();
        while !rest.is_empty() {
            let budget = if self.current.is_empty() {
                max
            } else {
                max.saturating_sub(self.current.len() + 1).max(max / 3).max(1)
            };
            if rest.len() <= budget {
                self.push_line(rest);
                self.has_content = true;
                break;
            }
            let cut = hard_split_point(rest, budget);
            self.push_line(rest[..cut].trim_end());
            self.has_content = true;
            self.flush();
            rest = rest[cut..].trim_start();
        }
    }

    fn add_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            if !self.current.is_empty() {
                self.push_line("");
            }
            return;
        }
        self.close_full_section();
        if !self.fits(line.len()) && !self.orphan_heading() {
            self.flush();
        }
        self.push_line(line);
        self.has_content = true;
    }
}

/// Split Markdown or plain text into structurally coherent chunks
pub fn split_markdown(text: &str, limits: &ChunkLimits) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut builder = ChunkBuilder::new(limits);

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        if is_fence(stripped) {
            let end = fence_end(&lines, i);
            builder.add_block(&lines[i..=end].join("\n"));
            i = end + 1;
            continue;
        }

        if is_heading(stripped) {
            builder.start_section(line);
            i += 1;
            continue;
        }

        if line.len() > limits.max_chunk_bytes && !is_table_row(stripped) {
            builder.add_long_line(line);
            i += 1;
            continue;
        }

        if is_list_item(stripped) {
            let end = list_item_end(&lines, i);
            builder.add_list_item(&lines[i..=end].join("\n"));
            i = end + 1;
            continue;
        }

        builder.add_line(line);
        i += 1;
    }
    builder.flush();

    merge_pieces(builder.pieces, limits)
}

fn merge_pieces(pieces: Vec<Piece>, limits: &ChunkLimits) -> Vec<String> {
    let ceiling = limits.merge_ceiling;
    let mut merged: Vec<Piece> = Vec::with_capacity(pieces.len());

    for piece in pieces {
        for part in resplit(&piece.text, ceiling) {
            match merged.last_mut() {
                Some(last)
                    if last.kind == PieceKind::Prose
                        && piece.kind == PieceKind::Prose
                        && last.text.len() + 2 + part.len() <= ceiling =>
                {
                    last.text.push_str("\n\n");
                    last.text.push_str(&part);
                }
                _ => merged.push(Piece {
                    text: part,
                    kind: piece.kind,
                }),
            }
        }
    }

    merged.into_iter().map(|p| p.text).collect()
}

enum SplitAt {
    /// Cut outside any code fence
    Boundary(usize),
    /// Cut inside a fence; the head gets a closing marker and the tail
    /// reopens the fence with the same opener line
    InsideFence { pos: usize, opener: String },
}

const CLOSE_FENCE: &str = "\n```";

fn find_split(text: &str, ceiling: usize) -> SplitAt {
    let limit = floor_char_boundary(text, ceiling);
    let fence_limit = floor_char_boundary(text, ceiling.saturating_sub(CLOSE_FENCE.len()));
    let min_pos = ceiling / 8;

    let mut in_fence = false;
    let mut opener = "";
    let mut opener_end = 0;
    let mut last_blank = None;
    let mut last_newline = None;
    let mut last_fence_newline: Option<(usize, &str)> = None;

    let mut offset = 0;
    for line in text.split('\n') {
        let line_start = offset;
        if line_start > limit {
            break;
        }
        if line_start > 0 {
            if !in_fence {
                last_newline = Some(line_start);
                if line.trim().is_empty() {
                    last_blank = Some(line_start);
                }
            } else if line_start <= fence_limit && line_start > opener_end + 1 {
                last_fence_newline = Some((line_start, opener));
            }
        }
        let stripped = line.trim();
        if is_fence(stripped) {
            if in_fence {
                in_fence = false;
            } else {
                in_fence = true;
                opener = stripped;
                opener_end = line_start + line.len();
            }
        }
        offset = line_start + line.len() + 1;
    }

    if let Some(pos) = last_blank.filter(|p| *p >= min_pos) {
        return SplitAt::Boundary(pos);
    }
    if let Some(pos) = last_newline.filter(|p| *p >= min_pos) {
        return SplitAt::Boundary(pos);
    }
    if let Some((pos, opener)) = last_fence_newline {
        return SplitAt::InsideFence {
            pos,
            opener: opener.to_string(),
        };
    }

    // No line boundary available: cut mid-line
    let cut = hard_split_point(text, fence_limit.max(1));
    let mut fence_open: Option<&str> = None;
    let mut offset = 0;
    for line in text.split('\n') {
        if offset >= cut {
            break;
        }
        let stripped = line.trim();
        if is_fence(stripped) {
            fence_open = match fence_open {
                Some(_) => None,
                None => Some(stripped),
            };
        }
        offset += line.len() + 1;
    }
    match fence_open {
        Some(opener) => SplitAt::InsideFence {
            pos: cut,
            opener: opener.to_string(),
        },
        None => SplitAt::Boundary(cut),
    }
}

/// Break text above `ceiling` bytes, preferring blank-line boundaries
fn resplit(text: &str, ceiling: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.to_string();

    while rest.len() > ceiling {
        let (head, tail) = match find_split(&rest, ceiling) {
            SplitAt::Boundary(pos) => (
                rest[..pos].trim_end().to_string(),
                rest[pos..].trim_start_matches(['\n', '\r']).to_string(),
            ),
            SplitAt::InsideFence { pos, opener } => (
                format!("{}{}", rest[..pos].trim_end_matches('\n'), CLOSE_FENCE),
                format!("{}\n{}", opener, rest[pos..].trim_start_matches('\n')),
            ),
        };
        if !head.trim().is_empty() {
            parts.push(head);
        }
        if tail.len() >= rest.len() {
            // No progress possible; emit as is rather than loop
            rest = tail;
            break;
        }
        rest = tail;
    }

    if !rest.trim().is_empty() {
        parts.push(rest);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence_count(s: &str) -> usize {
        s.lines().filter(|l| is_fence(l.trim())).count()
    }

    #[test]
    fn test_empty_document() {
        assert!(split_markdown("", &ChunkLimits::default()).is_empty());
        assert!(split_markdown("\n\n   \n", &ChunkLimits::default()).is_empty());
    }

    #[test]
    fn test_heading_detection() {
        assert!(is_heading("# Title"));
        assert!(is_heading("### Sub"));
        assert!(is_heading("#"));
        assert!(!is_heading("#hashtag"));
        assert!(!is_heading("####### seven"));
    }

    #[test]
    fn test_list_detection() {
        assert!(is_list_item("- item"));
        assert!(is_list_item("* item"));
        assert!(is_list_item("12. twelfth"));
        assert!(is_list_item("3) third"));
        assert!(!is_list_item("2024.05 was a date"));
        assert!(!is_list_item("-not a list"));
    }

    #[test]
    fn test_small_document_single_chunk() {
        let text = "# Intro\n\nPhotosynthesis converts light into energy.\n\nPlants need water.";
        let chunks = split_markdown(text, &ChunkLimits::default());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("# Intro"));
        assert!(chunks[0].contains("Plants need water."));
    }

    #[test]
    fn test_code_fence_stays_whole() {
        let mut text = String::from("# Code\n\nSome intro.\n\n```rust\n");
        for i in 0..150 {
            text.push_str(&format!("let value_{} = compute({});\n", i, i));
        }
        text.push_str("```\n\nAfter the code.");

        let limits = ChunkLimits::for_max(1000);
        let chunks = split_markdown(&text, &limits);
        let with_fence: Vec<&String> = chunks.iter().filter(|c| c.contains("```rust")).collect();
        assert_eq!(with_fence.len(), 1);
        assert!(with_fence[0].contains("let value_149"));
        for chunk in &chunks {
            assert_eq!(fence_count(chunk) % 2, 0, "unbalanced fence in {:?}", chunk);
        }
    }

    #[test]
    fn test_long_line_hard_split_at_space() {
        let word = "lorem ";
        let line = word.repeat(1000);
        let limits = ChunkLimits::new(600, 500, 600);
        let chunks = split_markdown(&line, &limits);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 600, "chunk too long: {}", chunk.len());
            assert!(!chunk.contains("lor em"));
        }
        let total: usize = chunks.iter().map(|c| c.replace(char::is_whitespace, "").len()).sum();
        assert_eq!(total, line.replace(char::is_whitespace, "").len());
    }

    #[test]
    fn test_long_url_without_spaces() {
        let url = format!("https://example.com/{}", "a".repeat(5000));
        let limits = ChunkLimits::new(1000, 800, 1000);
        let chunks = split_markdown(&url, &limits);
        assert!(chunks.iter().all(|c| c.len() <= 1000));
        assert_eq!(chunks.concat().len(), url.len());
    }

    #[test]
    fn test_list_items_not_split() {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "- item {} explains one idea in a complete sentence\n  with a continuation line\n",
                i
            ));
        }
        let limits = ChunkLimits::new(500, 400, 500);
        let chunks = split_markdown(&text, &limits);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Every continuation line is preceded by its item line
            let lines: Vec<&str> = chunk.lines().collect();
            assert!(lines[0].starts_with("- item"));
        }
    }

    #[test]
    fn test_consecutive_headings_kept_with_content() {
        let text = "# Chapter\n## Section\nBody text under the section.";
        let chunks = split_markdown(text, &ChunkLimits::default());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].ends_with("section."));
    }

    #[test]
    fn test_table_rows_never_split() {
        let mut text = String::from("| name | score |\n|---|---|\n");
        for i in 0..200 {
            text.push_str(&format!("| student {} | {} |\n", i, i % 100));
        }
        let limits = ChunkLimits::new(400, 300, 400);
        let chunks = split_markdown(&text, &limits);
        for chunk in &chunks {
            for line in chunk.lines() {
                if !line.trim().is_empty() {
                    assert!(line.starts_with('|') && line.ends_with('|'), "broken row {:?}", line);
                }
            }
        }
    }

    #[test]
    fn test_oversized_fence_reopened() {
        let mut text = String::from("```python\n");
        for i in 0..600 {
            text.push_str(&format!("print('line number {}')\n", i));
        }
        text.push_str("```\n");
        let limits = ChunkLimits::for_max(3000);
        let chunks = split_markdown(&text, &limits);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_CHUNK_BYTES);
            assert_eq!(fence_count(chunk) % 2, 0);
            assert!(chunk.starts_with("```python"));
        }
    }

    #[test]
    fn test_limits_clamped_to_hard_ceiling() {
        let limits = ChunkLimits::new(20_000, 15_000, 50_000);
        assert_eq!(limits.max_chunk_bytes, MAX_CHUNK_BYTES);
        assert_eq!(limits.merge_ceiling, MAX_CHUNK_BYTES);
        assert!(limits.heading_headroom <= MAX_CHUNK_BYTES);
        assert_eq!(ChunkLimits::for_max(12_000).merge_ceiling, MAX_CHUNK_BYTES);

        let para = "Sentence about tectonic plates. ".repeat(60);
        let text = vec![para; 12].join("\n\n");
        let chunks = split_markdown(&text, &limits);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_CHUNK_BYTES);
        }
    }

    #[test]
    fn test_prose_chunks_merge_under_ceiling() {
        let para = "Sentence about cells. ".repeat(40);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let limits = ChunkLimits::new(1000, 800, 8192);
        let chunks = split_markdown(&text, &limits);
        assert_eq!(chunks.len(), 1);
    }
}
