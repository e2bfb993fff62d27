//! Context assembly (component C6, second half). Pure and deterministic
//! given its inputs: concatenates chunks into a single budget-bounded
//! string with stable citation markers, skipping (never truncating) a
//! chunk that would overflow the budget.

use crate::retriever::ScoredChunk;

pub const DEFAULT_CHAR_BUDGET: usize = 12_000;

pub struct BuiltContext {
    pub text: String,
    pub included: Vec<ScoredChunk>,
}

pub struct ContextBuilder {
    char_budget: usize,
}

impl ContextBuilder {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CHAR_BUDGET)
    }
}

impl ContextBuilder {
    /// Builds context from `chunks` in rank order (the caller's ordering
    /// is preserved; this function does not re-sort). A chunk that would
    /// push the running total past the budget is skipped and the scan
    /// continues to the next, smaller, chunk — later chunks are not
    /// guaranteed to fit either, but this gives every chunk a chance.
    pub fn build(&self, chunks: Vec<ScoredChunk>) -> BuiltContext {
        let mut text = String::new();
        let mut included = Vec::new();
        let mut remaining = self.char_budget;

        for chunk in chunks {
            let marker = format!("[Source: {}, Part {}]\n", chunk.document_title, chunk.chunk_index);
            let block_len = marker.chars().count() + chunk.content.chars().count() + 2;
            if block_len > remaining {
                continue;
            }

            text.push_str(&marker);
            text.push_str(&chunk.content);
            text.push_str("\n\n");
            remaining -= block_len;
            included.push(chunk);
        }

        BuiltContext { text, included }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::ChunkSource;
    use uuid::Uuid;

    fn chunk(title: &str, index: u32, content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            document_title: title.to_string(),
            chunk_index: index,
            content: content.to_string(),
            score: 1.0,
            source: ChunkSource::Dense,
        }
    }

    #[test]
    fn includes_chunks_with_stable_source_markers() {
        let builder = ContextBuilder::default();
        let built = builder.build(vec![chunk("report.pdf", 2, "Q1 revenue was 12.3M")]);
        assert!(built.text.contains("[Source: report.pdf, Part 2]"));
        assert!(built.text.contains("Q1 revenue was 12.3M"));
        assert_eq!(built.included.len(), 1);
    }

    #[test]
    fn skips_overflowing_chunks_instead_of_truncating() {
        let builder = ContextBuilder::new(50);
        let chunks = vec![
            chunk("a", 0, "short chunk"),
            chunk("b", 0, &"x".repeat(200)),
            chunk("c", 0, "fits"),
        ];
        let built = builder.build(chunks);
        assert!(built.included.iter().any(|c| c.content == "short chunk"));
        assert!(built.included.iter().any(|c| c.content == "fits"));
        assert!(built.included.iter().all(|c| c.content.len() < 200));
    }

    #[test]
    fn zero_chunks_produces_empty_context() {
        let builder = ContextBuilder::default();
        let built = builder.build(vec![]);
        assert!(built.text.is_empty());
        assert!(built.included.is_empty());
    }
}
