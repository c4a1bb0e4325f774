//! Context assembly for RAG responses.

use crate::vector_store::SearchResult;
use serde::Serialize;
use std::collections::HashSet;

/// Separator placed between chunk texts; counts toward the budget.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

/// Where one chunk's text sits inside the assembled context (character offsets).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSpan {
    pub source_id: String,
    pub position: usize,
    pub start: usize,
    pub end: usize,
}

/// Chunks of one source that made it into the context.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub source_id: String,
    pub title: Option<String>,
    /// Chunk positions, ascending.
    pub positions: Vec<usize>,
    /// Mean similarity of the included chunks.
    pub avg_score: f32,
}

impl Citation {
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_id)
    }
}

/// The bounded context block handed to generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub text: String,
    /// Distinct sources in first-contribution order.
    pub sources: Vec<String>,
    pub spans: Vec<ContextSpan>,
    pub citations: Vec<Citation>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Length of the context text in characters.
    pub fn char_len(&self) -> usize {
        self.spans.last().map(|s| s.end).unwrap_or(0)
    }
}

/// Concatenate ranked results into a context of at most `max_chars` characters.
///
/// Results are taken in order until the next one would overflow the budget;
/// chunks are never cut. A repeated `(source_id, position)` is skipped.
pub fn assemble(results: &[SearchResult], max_chars: usize) -> AssembledContext {
    let delimiter_len = CONTEXT_DELIMITER.chars().count();
    let mut context = AssembledContext::default();
    let mut seen: HashSet<(&str, usize)> = HashSet::new();
    let mut used = 0;
    let mut scores: Vec<Vec<f32>> = Vec::new();

    for result in results {
        let chunk = &result.chunk;
        if !seen.insert((chunk.source_id.as_str(), chunk.position)) {
            continue;
        }

        let separator = if context.spans.is_empty() { 0 } else { delimiter_len };
        let len = chunk.text.chars().count();
        if used + separator + len > max_chars {
            break;
        }

        if separator > 0 {
            context.text.push_str(CONTEXT_DELIMITER);
        }
        context.text.push_str(&chunk.text);
        context.spans.push(ContextSpan {
            source_id: chunk.source_id.clone(),
            position: chunk.position,
            start: used + separator,
            end: used + separator + len,
        });
        used += separator + len;

        match context.citations.iter().position(|c| c.source_id == chunk.source_id) {
            Some(i) => {
                context.citations[i].positions.push(chunk.position);
                scores[i].push(result.score);
            }
            None => {
                context.sources.push(chunk.source_id.clone());
                context.citations.push(Citation {
                    source_id: chunk.source_id.clone(),
                    title: chunk.title.clone(),
                    positions: vec![chunk.position],
                    avg_score: 0.0,
                });
                scores.push(vec![result.score]);
            }
        }
    }

    for (citation, scores) in context.citations.iter_mut().zip(&scores) {
        citation.positions.sort_unstable();
        citation.avg_score = scores.iter().sum::<f32>() / scores.len() as f32;
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;

    fn result(source_id: &str, position: usize, text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                source_id: source_id.to_string(),
                title: None,
                position,
                start_offset: 0,
                end_offset: text.chars().count(),
                text: text.to_string(),
            },
            score,
        }
    }

    #[test]
    fn test_budget_excludes_chunk_that_does_not_fit() {
        let a = "a".repeat(30);
        let b = "b".repeat(30);
        let context = assemble(&[result("x.md", 0, &a, 0.9), result("x.md", 1, &b, 0.8)], 40);

        assert_eq!(context.text, a);
        assert_eq!(context.sources, vec!["x.md"]);
        assert_eq!(context.spans.len(), 1);
    }

    #[test]
    fn test_delimiter_counts_toward_budget() {
        let a = "a".repeat(10);
        let b = "b".repeat(10);
        let results = [result("x.md", 0, &a, 0.9), result("x.md", 1, &b, 0.8)];
        let exact = 20 + CONTEXT_DELIMITER.chars().count();

        assert_eq!(assemble(&results, exact).spans.len(), 2);
        assert_eq!(assemble(&results, exact - 1).spans.len(), 1);

        let context = assemble(&results, exact);
        assert_eq!(context.text, format!("{}{}{}", a, CONTEXT_DELIMITER, b));
        assert_eq!(context.char_len(), context.text.chars().count());
        assert_eq!(context.spans[1].start, 10 + CONTEXT_DELIMITER.chars().count());
    }

    #[test]
    fn test_never_exceeds_budget() {
        let results: Vec<SearchResult> = (0..20)
            .map(|i| result("x.md", i, &"é".repeat(7 + i * 3), 1.0 - i as f32 * 0.01))
            .collect();

        for max_chars in [0, 5, 7, 50, 100, 333, 1000] {
            let context = assemble(&results, max_chars);
            assert!(context.text.chars().count() <= max_chars);
            for span in &context.spans {
                let text: String = context.text.chars().skip(span.start).take(span.end - span.start).collect();
                assert_eq!(text, results[span.position].chunk.text);
            }
        }
    }

    #[test]
    fn test_duplicates_are_skipped_without_stopping() {
        let context = assemble(
            &[
                result("a.md", 0, "first", 0.9),
                result("a.md", 0, "first", 0.9),
                result("b.md", 3, "second", 0.7),
                result("a.md", 1, "third", 0.6),
            ],
            1000,
        );

        assert_eq!(context.spans.len(), 3);
        assert_eq!(context.sources, vec!["a.md", "b.md"]);
        assert_eq!(context.citations[0].positions, vec![0, 1]);
        assert!((context.citations[0].avg_score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_empty_results() {
        let context = assemble(&[], 100);
        assert!(context.is_empty());
        assert!(context.text.is_empty());
        assert!(context.sources.is_empty());
    }
}
