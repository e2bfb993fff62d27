use std::collections::HashMap;
use uuid::Uuid;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Hand-rolled BM25-style lexical index, scoped to a single workspace.
/// Mirrors `LinearAnnIndex`: one instance per workspace, so a sparse scan
/// can never surface a chunk belonging to another tenant.
#[derive(Default)]
pub struct SparseIndex {
    term_freqs: HashMap<Uuid, HashMap<String, u32>>,
    doc_lengths: HashMap<Uuid, u32>,
    doc_freq: HashMap<String, u32>,
    total_length: u64,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes (or re-indexes) a chunk's content under `id`.
    pub fn insert(&mut self, id: Uuid, content: &str) {
        self.delete(id);

        let terms = tokenize(content);
        let length = terms.len() as u32;
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *freqs.entry(term).or_insert(0) += 1;
        }
        for term in freqs.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }

        self.total_length += length as u64;
        self.doc_lengths.insert(id, length);
        self.term_freqs.insert(id, freqs);
    }

    pub fn delete(&mut self, id: Uuid) -> bool {
        let Some(freqs) = self.term_freqs.remove(&id) else {
            return false;
        };
        for term in freqs.keys() {
            if let Some(count) = self.doc_freq.get_mut(term) {
                *count -= 1;
                if *count == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        if let Some(length) = self.doc_lengths.remove(&id) {
            self.total_length -= length as u64;
        }
        true
    }

    /// Top-k documents by BM25 score against `query`, highest first.
    /// Documents sharing no term with the query are excluded entirely.
    pub fn search(&self, query: &str, k: usize) -> Vec<(Uuid, f32)> {
        if self.term_freqs.is_empty() {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let n = self.term_freqs.len() as f32;
        let avg_len = self.total_length as f32 / n;

        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        for term in &query_terms {
            let Some(&df) = self.doc_freq.get(term) else {
                continue;
            };
            let idf = ((n - df as f32 + 0.5) / (df as f32 + 0.5) + 1.0).ln();

            for (id, freqs) in &self.term_freqs {
                let Some(&tf) = freqs.get(term) else {
                    continue;
                };
                let doc_len = *self.doc_lengths.get(id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len);
                let score = idf * (tf * (K1 + 1.0)) / denom;
                *scores.entry(*id).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        ranked
    }

    pub fn len(&self) -> usize {
        self.term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_freqs.is_empty()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_term_frequency_and_length() {
        let mut index = SparseIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        index.insert(a, "the quick brown fox jumps over the lazy dog");
        index.insert(b, "fox fox fox spotted near the henhouse at dawn");
        index.insert(c, "an entirely unrelated passage about tax law");

        let results = index.search("fox", 2);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, b);
        assert_eq!(results[1].0, a);
    }

    #[test]
    fn delete_removes_document_frequency_contribution() {
        let mut index = SparseIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index.insert(a, "alpha beta gamma");
        index.insert(b, "alpha alpha delta");

        assert!(index.delete(a));
        assert!(!index.delete(a));
        assert_eq!(index.len(), 1);

        let results = index.search("alpha", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, b);
    }

    #[test]
    fn query_with_no_matching_terms_returns_empty() {
        let mut index = SparseIndex::new();
        index.insert(Uuid::new_v4(), "completely different content here");

        assert!(index.search("nonexistent", 5).is_empty());
    }
}
