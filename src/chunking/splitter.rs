//! Boundary-preferring recursive splitter with overlapping windows.

use super::{Chunk, Document, SplitterConfig};
use crate::error::{DocentError, Result};
use std::ops::Range;
use tracing::debug;

/// Splits documents into overlapping, size-bounded chunks.
///
/// All lengths and offsets are measured in characters.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<Vec<char>>,
}

impl TextSplitter {
    /// Create a splitter, rejecting sizes that cannot produce overlapping windows.
    pub fn new(config: SplitterConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(DocentError::InvalidConfiguration(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(DocentError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }

        Ok(Self {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
            separators: config.separators.iter().map(|s| s.chars().collect()).collect(),
        })
    }

    /// Split a document into chunks ordered by position.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = document.text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        // Pieces never exceed the stride, so every window can hand over to the
        // next one on a piece boundary while still sharing `overlap` characters.
        let stride = self.chunk_size - self.overlap;
        let mut pieces = Vec::new();
        segment(&chars, 0..chars.len(), &self.separators, stride, &mut pieces);

        let chunks: Vec<Chunk> = self
            .windows(&pieces, chars.len())
            .into_iter()
            .enumerate()
            .map(|(position, range)| Chunk {
                source_id: document.source_id.clone(),
                title: document.title.clone(),
                position,
                start_offset: range.start,
                end_offset: range.end,
                text: chars[range].iter().collect(),
            })
            .collect();

        debug!(
            "Split {} ({} chars) into {} chunks from {} pieces",
            document.source_id,
            chars.len(),
            chunks.len(),
            pieces.len()
        );

        chunks
    }

    /// Group pieces into windows covering `0..total`.
    fn windows(&self, pieces: &[Range<usize>], total: usize) -> Vec<Range<usize>> {
        let mut windows = Vec::new();
        let mut start = 0;

        loop {
            let end = self.extend(pieces, start);
            windows.push(start..end);
            if end >= total {
                break;
            }
            start = self.next_start(pieces, start, end);
        }

        windows
    }

    /// Furthest piece end reachable from `start` without exceeding the chunk size.
    ///
    /// A piece that is too long on its own is taken whole.
    fn extend(&self, pieces: &[Range<usize>], start: usize) -> usize {
        let first = pieces.partition_point(|p| p.end <= start);
        let mut end = start;

        for piece in &pieces[first..] {
            if piece.end - start > self.chunk_size {
                break;
            }
            end = piece.end;
        }

        if end == start {
            end = pieces[first].end;
        }
        end
    }

    /// Start of the window following `start..end`.
    ///
    /// Picks the latest piece boundary that keeps at least `overlap` shared characters
    /// and still lets the next window reach past `end`; falls back to the exact
    /// character position when no boundary qualifies.
    fn next_start(&self, pieces: &[Range<usize>], start: usize, end: usize) -> usize {
        let next = pieces.partition_point(|p| p.start < end);
        let next_len = pieces.get(next).map(|p| p.len()).unwrap_or(0);

        // Oversized neighbours cannot share a window; no overlap is possible there.
        if next_len > self.chunk_size - self.overlap || end - start <= self.overlap {
            return end;
        }

        let lo = (end + next_len).saturating_sub(self.chunk_size).max(start + 1);
        let hi = end - self.overlap;

        let from = pieces.partition_point(|p| p.start < lo);
        pieces[from..]
            .iter()
            .map(|p| p.start)
            .take_while(|&boundary| boundary <= hi)
            .last()
            .unwrap_or(hi)
    }
}

/// Recursively cut `range` into pieces no longer than `max`.
///
/// Separators stay attached to the piece they terminate, so pieces tile the range.
/// A range with no usable separator is emitted as-is.
fn segment(
    chars: &[char],
    range: Range<usize>,
    separators: &[Vec<char>],
    max: usize,
    out: &mut Vec<Range<usize>>,
) {
    if range.len() <= max {
        out.push(range);
        return;
    }

    for (level, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            let mut start = range.start;
            while start < range.end {
                let end = (start + max).min(range.end);
                out.push(start..end);
                start = end;
            }
            return;
        }

        let cuts = separator_ends(chars, range.clone(), separator);
        if cuts.is_empty() {
            continue;
        }

        let finer = &separators[level + 1..];
        let mut start = range.start;
        for cut in cuts.into_iter().chain(std::iter::once(range.end)) {
            if cut > start {
                segment(chars, start..cut, finer, max, out);
                start = cut;
            }
        }
        return;
    }

    out.push(range);
}

/// Offsets just past each non-overlapping occurrence of `separator` in `range`.
fn separator_ends(chars: &[char], range: Range<usize>, separator: &[char]) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut i = range.start;

    while i + separator.len() <= range.end {
        if chars[i..i + separator.len()] == *separator {
            i += separator.len();
            ends.push(i);
        } else {
            i += 1;
        }
    }

    ends
}
