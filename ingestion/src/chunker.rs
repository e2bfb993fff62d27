//! Chunking for component C4 step 5: chunks of <= 900 characters with 120
//! characters of overlap between consecutive chunks, preferring paragraph,
//! sentence, and whitespace boundaries within +/-15% of the target size.
//! Built on `text-splitter`'s boundary-aware size search (same crate and
//! idiom this lineage already used for its prior chunker), with the
//! overlap and contiguous-indexing rules layered on top. Operates on
//! `char` boundaries throughout, so a chunk can never split a UTF-8 code
//! point.

use text_splitter::{Characters, TextSplitter};

pub const TARGET_CHUNK_CHARS: usize = 900;
pub const OVERLAP_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub index: u32,
    pub content: String,
}

pub struct Chunker {
    splitter: TextSplitter<Characters>,
    target_chars: usize,
    overlap_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(TARGET_CHUNK_CHARS, OVERLAP_CHARS)
    }
}

impl Chunker {
    pub fn new(target_chars: usize, overlap_chars: usize) -> Self {
        Self {
            splitter: TextSplitter::default().with_trim_chunks(true),
            target_chars,
            overlap_chars,
        }
    }

    /// Splits `text` into contiguous, 0-based chunks. Empty or
    /// whitespace-only documents produce zero chunks (spec: "Empty
    /// documents produce zero chunks and terminate READY with a note in
    /// metadata").
    pub fn chunk(&self, text: &str) -> Vec<RawChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let pieces: Vec<&str> = self.splitter.chunks(text, self.target_chars).collect();
        let mut out = Vec::with_capacity(pieces.len());
        let mut carry = String::new();

        for (i, piece) in pieces.into_iter().enumerate() {
            let mut content = String::with_capacity(carry.len() + piece.len());
            content.push_str(&carry);
            content.push_str(piece);

            out.push(RawChunk {
                index: i as u32,
                content,
            });

            carry = trailing_chars(piece, self.overlap_chars);
        }

        out
    }
}

/// The last `max_chars` characters of `s`, never cutting mid-codepoint
/// since it walks `chars()` rather than byte offsets.
fn trailing_chars(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        return s.to_string();
    }
    s.chars().skip(total - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_produces_zero_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("   \n\t  ").is_empty());
    }

    #[test]
    fn chunk_indices_are_contiguous_from_zero() {
        let chunker = Chunker::new(50, 10);
        let text = "Paragraph one is here. ".repeat(40);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u32);
        }
    }

    #[test]
    fn consecutive_chunks_share_an_overlap() {
        let chunker = Chunker::new(50, 10);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma tau upsilon phi chi psi omega ".repeat(3);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() >= 2);
        let tail_of_first = trailing_chars(&chunks[0].content, 10);
        assert!(chunks[1].content.starts_with(&tail_of_first) || chunks[1].content.contains(&tail_of_first));
    }

    #[test]
    fn never_splits_mid_codepoint() {
        let chunker = Chunker::new(20, 5);
        let text = "日本語のテキストを正しく分割できることを確認するテストです。".repeat(5);
        let chunks = chunker.chunk(&text);
        for chunk in &chunks {
            assert!(std::str::from_utf8(chunk.content.as_bytes()).is_ok());
        }
    }

    #[test]
    fn single_short_document_is_one_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("Hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }
}
