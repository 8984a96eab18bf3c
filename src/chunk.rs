//! Paragraph-boundary text chunker.
//!
//! Splits page or section text into [`TextChunk`]s of at most `max_chars`
//! characters. Every chunk is a verbatim slice of its source and records its
//! char span, so callers can point back into the extracted text.
//!
//! # Algorithm
//!
//! 1. Split the text into paragraphs on blank lines, trimming each.
//! 2. Split paragraphs longer than `max_chars` on the last whitespace before
//!    the limit, or hard-split at a char boundary when one word exceeds it.
//! 3. Pack consecutive pieces into a chunk while the span from the first
//!    piece to the last stays within `max_chars`.
//! 4. With `overlap_chars > 0`, move each chunk's start back into the tail
//!    of the previous chunk, to a word start, as long as the chunk still fits.
//!
//! Empty and whitespace-only input yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use multimodal_index::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 250, 0);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].start_char, 0);
//! ```

/// A chunk of text with its char span in the source, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
}

/// Split text into chunks on paragraph boundaries, respecting `max_chars`.
///
/// Chunks come back in reading order with non-decreasing spans. A chunk's
/// overlap never pushes it past `max_chars`.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let doc = CharView { text, chars };

    let pieces: Vec<(usize, usize)> = doc
        .paragraphs()
        .into_iter()
        .flat_map(|p| doc.split_long(p, max_chars))
        .collect();
    let spans = pack(&pieces, max_chars);
    let spans = doc.apply_overlap(spans, max_chars, overlap_chars);

    spans
        .into_iter()
        .map(|(start, end)| TextChunk {
            text: doc.slice(start, end).to_string(),
            start_char: start,
            end_char: end,
        })
        .collect()
}

/// Text addressed by char index.
struct CharView<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
}

impl CharView<'_> {
    fn len(&self) -> usize {
        self.chars.len()
    }

    fn is_ws(&self, i: usize) -> bool {
        self.chars[i].1.is_whitespace()
    }

    fn byte_at(&self, i: usize) -> usize {
        self.chars.get(i).map(|c| c.0).unwrap_or(self.text.len())
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[self.byte_at(start)..self.byte_at(end)]
    }

    /// Trimmed paragraph spans; paragraphs are separated by blank lines.
    fn paragraphs(&self) -> Vec<(usize, usize)> {
        let n = self.len();
        let mut spans = Vec::new();
        let mut para: Option<(usize, usize)> = None;
        let mut line_start = 0;

        while line_start < n {
            let line_end = (line_start..n)
                .find(|&i| self.chars[i].1 == '\n')
                .unwrap_or(n);
            match (line_start..line_end).find(|&i| !self.is_ws(i)) {
                None => {
                    if let Some(p) = para.take() {
                        spans.push(p);
                    }
                }
                Some(first) => {
                    let last = (first..line_end)
                        .rev()
                        .find(|&i| !self.is_ws(i))
                        .map_or(first + 1, |i| i + 1);
                    para = Some(match para {
                        Some((start, _)) => (start, last),
                        None => (first, last),
                    });
                }
            }
            line_start = line_end + 1;
        }
        if let Some(p) = para {
            spans.push(p);
        }
        spans
    }

    /// Splits one trimmed span into pieces of at most `max_chars`.
    fn split_long(&self, (start, end): (usize, usize), max_chars: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut pos = start;
        while pos < end {
            if end - pos <= max_chars {
                out.push((pos, end));
                break;
            }
            let limit = pos + max_chars;
            let cut = if self.is_ws(limit) {
                limit
            } else {
                (pos + 1..limit)
                    .rev()
                    .find(|&i| self.is_ws(i))
                    .unwrap_or(limit)
            };
            let piece_end = (pos..cut)
                .rev()
                .find(|&i| !self.is_ws(i))
                .map_or(cut, |i| i + 1);
            out.push((pos, piece_end));
            pos = (cut..end).find(|&i| !self.is_ws(i)).unwrap_or(end);
        }
        out
    }

    fn apply_overlap(
        &self,
        spans: Vec<(usize, usize)>,
        max_chars: usize,
        overlap_chars: usize,
    ) -> Vec<(usize, usize)> {
        if overlap_chars == 0 {
            return spans;
        }
        let mut out: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            let start = match out.last() {
                Some(&(prev_start, prev_end)) => {
                    let floor = prev_end.saturating_sub(overlap_chars).max(prev_start + 1);
                    (floor..prev_end)
                        .filter(|&c| !self.is_ws(c) && self.is_ws(c - 1))
                        .find(|&c| end - c <= max_chars)
                        .unwrap_or(start)
                }
                None => start,
            };
            out.push((start, end));
        }
        out
    }
}

fn pack(pieces: &[(usize, usize)], max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for &(start, end) in pieces {
        current = match current {
            Some((cur_start, _)) if end - cur_start <= max_chars => Some((cur_start, end)),
            Some(full) => {
                spans.push(full);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    spans.extend(current);
    spans
}
