//! Recursive separator text chunker.
//!
//! Splits the knowledge document into overlapping [`Chunk`]s of at most
//! `chunk_size` characters. Splitting walks a prioritised separator list
//! (paragraph break, line break, sentence punctuation, space, and finally
//! single characters) so that passages break at the most natural boundary
//! available.
//!
//! # Algorithm
//!
//! 1. Pick the first separator that occurs in the text (`""` always matches).
//! 2. Split on it, keeping each separator attached to the end of the piece
//!    before it.
//! 3. Pieces shorter than `chunk_size` are merged greedily into windows of at
//!    most `chunk_size` characters. When a window is flushed, its trailing
//!    pieces are kept (up to `overlap` characters) as the start of the next
//!    window.
//! 4. Pieces of `chunk_size` characters or more are split again with the
//!    remaining separators. The character split guarantees termination.
//! 5. Each window is trimmed of surrounding whitespace and emitted with its
//!    byte offset in the source text. Whitespace-only windows are dropped.
//!
//! Lengths are counted in `char`s, so CJK text is measured per character.
//!
//! # Example
//!
//! ```rust
//! use rag_qa::chunk::Chunker;
//!
//! let chunker = Chunker::new(10, 2);
//! let chunks = chunker.split("doc.txt", "猫喜欢睡觉。狗喜欢跑步。");
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].content, "猫喜欢睡觉。");
//! assert_eq!(chunks[1].content, "狗喜欢跑步。");
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;

use uuid::Uuid;

use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Separator priority for Chinese prose: paragraphs, lines, full-width
/// sentence punctuation, spaces, then single characters.
pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", "。", "！", "？", "；", "，", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Splits text into overlapping chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
            separators: default_separators(),
        }
    }

    /// Replace the separator list. Order is priority order.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk a loaded [`Document`], tagging each chunk with its path.
    pub fn split_document(&self, doc: &Document) -> Vec<Chunk> {
        self.split(&doc.source_label(), &doc.raw_content)
    }

    /// Split `text` into chunks in source order.
    ///
    /// `source` is recorded in each chunk's metadata. Empty or
    /// whitespace-only text yields no chunks.
    pub fn split(&self, source: &str, text: &str) -> Vec<Chunk> {
        let mut spans = Vec::new();
        if !text.is_empty() {
            self.split_range(text, 0..text.len(), &self.separators, &mut spans);
        }

        let mut chunks = Vec::with_capacity(spans.len());
        let mut covered = 0usize;
        for span in spans {
            let raw = &text[span.clone()];
            let content = raw.trim();
            let start = span.start + (raw.len() - raw.trim_start().len());
            let end = start + content.len();
            // Skip blank spans and spans whose text the previous chunk already holds.
            if content.is_empty() || (!chunks.is_empty() && end <= covered) {
                continue;
            }
            covered = end;
            let chunk_index = chunks.len() as i64;
            chunks.push(make_chunk(source, chunk_index, content, start));
        }
        chunks
    }

    fn split_range(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[String],
        out: &mut Vec<Range<usize>>,
    ) {
        let piece = &text[range.clone()];
        let (separator, finer) = pick_separator(piece, separators);
        let pieces = split_keep_end(piece, separator, range.start);

        let mut small: Vec<Range<usize>> = Vec::new();
        for p in pieces {
            if char_len(&text[p.clone()]) < self.chunk_size {
                small.push(p);
                continue;
            }
            if !small.is_empty() {
                self.merge(text, &small, out);
                small.clear();
            }
            if separator.is_empty() {
                // Single character at or above chunk_size: nothing finer left.
                out.push(p);
            } else {
                self.split_range(text, p, finer, out);
            }
        }
        if !small.is_empty() {
            self.merge(text, &small, out);
        }
    }

    /// Merge contiguous small pieces into windows of at most `chunk_size`
    /// characters, carrying up to `overlap` characters into the next window.
    fn merge(&self, text: &str, pieces: &[Range<usize>], out: &mut Vec<Range<usize>>) {
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for p in pieces {
            let len = char_len(&text[p.clone()]);
            if total + len > self.chunk_size && !window.is_empty() {
                out.push(window_span(&window));
                while total > self.overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((p.clone(), len));
            total += len;
        }

        if !window.is_empty() {
            out.push(window_span(&window));
        }
    }
}

/// Chunk `text` with the default separators.
pub fn chunk_text(source: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    Chunker::new(chunk_size, overlap).split(source, text)
}

/// Rebuild the source text from chunks by dropping each chunk's overlap
/// with its predecessor. Whitespace trimmed at chunk edges is not restored.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let start = chunk.source_offset;
        let end = start + chunk.content.len();
        if end <= covered {
            continue;
        }
        if start >= covered {
            out.push_str(&chunk.content);
        } else {
            out.push_str(&chunk.content[covered - start..]);
        }
        covered = end;
    }
    out
}

/// First separator present in `text`, plus the finer separators after it.
/// Falls back to the character split when none match.
fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return ("", &[]);
        }
        if text.contains(sep.as_str()) {
            return (sep.as_str(), &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split `text` on `separator`, keeping the separator at the end of each
/// piece. Returned ranges are absolute (offset by `base`).
fn split_keep_end(text: &str, separator: &str, base: usize) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| base + i..base + i + c.len_utf8())
            .collect();
    }

    let mut ranges = Vec::new();
    let mut start = 0;
    for (i, m) in text.match_indices(separator) {
        let end = i + m.len();
        ranges.push(base + start..base + end);
        start = end;
    }
    if start < text.len() {
        ranges.push(base + start..base + text.len());
    }
    ranges
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Range<usize> {
    let start = window.front().map(|(r, _)| r.start).unwrap_or(0);
    let end = window.back().map(|(r, _)| r.end).unwrap_or(start);
    start..end
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source: &str, index: i64, content: &str, offset: usize) -> Chunk {
    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), source.to_string());
    metadata.insert("chunk_index".to_string(), index.to_string());

    Chunk {
        id: Uuid::new_v4().to_string(),
        chunk_index: index,
        content: content.to_string(),
        metadata,
        source_offset: offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc", "Hello, world!", 500, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].source_offset, 0);
        assert_eq!(chunks[0].metadata["source"], "doc");
        assert_eq!(chunks[0].metadata["chunk_index"], "0");
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(chunk_text("doc", "", 500, 100).is_empty());
        assert!(chunk_text("doc", " \n\n \n", 500, 100).is_empty());
    }

    #[test]
    fn test_chinese_sentences_keep_punctuation() {
        let text = "猫喜欢睡觉。狗喜欢跑步。";
        let chunks = chunk_text("doc", text, 10, 2);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["猫喜欢睡觉。", "狗喜欢跑步。"]);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_overlap_between_adjacent_chunks() {
        let text = "a b c d e f g h";
        let chunks = chunk_text("doc", text, 5, 2);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].source_offset + pair[0].content.len();
            assert!(
                pair[1].source_offset < prev_end,
                "expected overlap between {:?} and {:?}",
                pair[0].content,
                pair[1].content
            );
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_size_bound_holds() {
        let text = "第一段落的内容比较长，包含多个分句；还有问号吗？有的！最后结束。\n\n\
                    第二段落。\n第三行文字，继续写一些内容，让它超过限制。\n\n"
            .repeat(8);
        for (size, overlap) in [(10, 2), (30, 5), (50, 10), (200, 40)] {
            let chunks = chunk_text("doc", &text, size, overlap);
            for c in &chunks {
                assert!(
                    c.content.chars().count() <= size + overlap,
                    "chunk of {} chars exceeds {}+{}",
                    c.content.chars().count(),
                    size,
                    overlap
                );
            }
            assert_eq!(strip_ws(&reconstruct(&chunks)), strip_ws(&text));
        }
    }

    #[test]
    fn test_every_chunk_advances_past_previous() {
        let cases = [
            ("甲乙丙丁。己庚辛壬。\n", 10, 5),
            ("甲乙丙丁。 己庚辛壬。 癸子丑寅。\n", 10, 5),
            ("猫喜欢睡觉。\n狗喜欢跑步。\n鸟喜欢唱歌。\n", 8, 4),
        ];
        for (text, size, overlap) in cases {
            let chunks = chunk_text("doc", text, size, overlap);
            assert!(!chunks.is_empty());
            for pair in chunks.windows(2) {
                let prev_end = pair[0].source_offset + pair[0].content.len();
                let next_end = pair[1].source_offset + pair[1].content.len();
                assert!(
                    next_end > prev_end,
                    "chunk {:?} is already covered by {:?}",
                    pair[1].content,
                    pair[0].content
                );
            }
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.chunk_index, i as i64);
            }
            assert_eq!(strip_ws(&reconstruct(&chunks)), strip_ws(text));
        }

        let chunks = chunk_text("doc", "甲乙丙丁。己庚辛壬。\n", 10, 5);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["甲乙丙丁。己庚辛壬。"]);
    }

    #[test]
    fn test_long_token_falls_back_to_characters() {
        let text = "x".repeat(23);
        let chunks = chunk_text("doc", &text, 10, 3);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.content.len() <= 10);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_custom_separators_without_empty_still_terminate() {
        let chunker = Chunker::new(4, 0).with_separators(vec!["\n".to_string()]);
        let chunks = chunker.split("doc", "abcdefghij\nkl");
        assert_eq!(reconstruct(&chunks), "abcdefghijkl");
        for c in &chunks {
            assert!(c.content.chars().count() <= 4);
        }
    }

    #[test]
    fn test_offsets_point_into_source() {
        let text = "  first paragraph here.\n\nsecond paragraph here.  ";
        let chunks = chunk_text("doc", text, 25, 0);
        for c in &chunks {
            assert_eq!(&text[c.source_offset..c.source_offset + c.content.len()], c.content);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("第{}句话。", i))
            .collect::<Vec<_>>()
            .join("");
        let chunks = chunk_text("doc", &text, 20, 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic_content() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc", text, 8, 2);
        let c2 = chunk_text("doc", text, 8, 2);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.source_offset, b.source_offset);
        }
    }
}
