use std::collections::HashMap;
use uuid::Uuid;

/// Linear-scan cosine-similarity index, scoped to a single workspace.
/// A placeholder for HNSW/IVFFlat: correct and simple, O(n) per query.
/// `Repository` keeps one of these per workspace so a scan never crosses
/// a tenant boundary even by accident.
#[derive(Default)]
pub struct LinearAnnIndex {
    embeddings: HashMap<Uuid, Vec<f32>>,
}

impl LinearAnnIndex {
    pub fn new() -> Self {
        Self {
            embeddings: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: Uuid, embedding: Vec<f32>) {
        self.embeddings.insert(id, embedding);
    }

    pub fn delete(&mut self, id: Uuid) -> bool {
        self.embeddings.remove(&id).is_some()
    }

    /// Top-k nearest neighbors by cosine similarity, highest score first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let mut scores: Vec<(Uuid, f32)> = self
            .embeddings
            .iter()
            .filter_map(|(id, emb)| cosine_similarity(query, emb).map(|score| (*id, score)))
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);
        scores
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot / (norm_a * norm_b))
}
