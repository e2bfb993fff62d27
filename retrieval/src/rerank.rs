//! Reranking (component C6, first half). Three closed modes: `Disabled`
//! (pass-through), `Heuristic` (cheap deterministic signals, no I/O), and
//! `Model` (cross-encoder through a port). The model path never fails the
//! request: a transient error falls back to pre-rerank order and
//! increments `retrieval_fallback{stage=rerank}`.

use crate::retriever::ScoredChunk;
use async_trait::async_trait;
use ragcore_core::metrics::Metrics;
use ragcore_core::ports::PortError;
use std::sync::Arc;

/// A cross-encoder-shaped reranking port: given the query and the current
/// chunk order, returns a permutation of indices into that slice,
/// highest-relevance first.
#[async_trait]
pub trait RerankPort: Send + Sync {
    async fn rerank(&self, query: &str, chunks: &[ScoredChunk]) -> Result<Vec<usize>, PortError>;
}

#[derive(Clone)]
pub enum RerankMode {
    Disabled,
    Heuristic,
    Model(Arc<dyn RerankPort>),
}

pub struct Reranker {
    mode: RerankMode,
    metrics: Arc<Metrics>,
}

impl Reranker {
    pub fn new(mode: RerankMode, metrics: Arc<Metrics>) -> Self {
        Self { mode, metrics }
    }

    pub async fn rerank(&self, query: &str, chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        match &self.mode {
            RerankMode::Disabled => chunks,
            RerankMode::Heuristic => heuristic_rerank(query, chunks),
            RerankMode::Model(port) => match port.rerank(query, &chunks).await {
                Ok(order) if order.len() == chunks.len() => apply_order(chunks, order),
                _ => {
                    self.metrics.record_retrieval_fallback("rerank");
                    chunks
                }
            },
        }
    }
}

fn apply_order(chunks: Vec<ScoredChunk>, order: Vec<usize>) -> Vec<ScoredChunk> {
    let mut pool: Vec<Option<ScoredChunk>> = chunks.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| pool.get_mut(i).and_then(|slot| slot.take()))
        .collect()
}

/// Deterministic reordering based on exact keyword overlap with the
/// query, a chunk-length penalty (very short or very long chunks score
/// lower), and a small recency bonus for later chunk indices within a
/// document (later chunks are often conclusions/summaries).
fn heuristic_rerank(query: &str, mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let query_terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();

    let mut scored: Vec<(f32, ScoredChunk)> = chunks
        .drain(..)
        .map(|chunk| {
            let heuristic = heuristic_score(&query_terms, &chunk);
            (chunk.score + heuristic, chunk)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.document_id.cmp(&b.1.document_id))
            .then_with(|| a.1.chunk_index.cmp(&b.1.chunk_index))
    });
    scored.into_iter().map(|(_, chunk)| chunk).collect()
}

fn heuristic_score(query_terms: &[String], chunk: &ScoredChunk) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_lower = chunk.content.to_lowercase();
    let overlap = query_terms.iter().filter(|t| content_lower.contains(t.as_str())).count();
    let overlap_score = overlap as f32 / query_terms.len() as f32;

    let len = chunk.content.chars().count() as f32;
    let length_penalty = if len < 40.0 {
        -0.1
    } else if len > 2000.0 {
        -0.05
    } else {
        0.0
    };

    let recency_bonus = (chunk.chunk_index as f32 * 0.001).min(0.02);

    overlap_score * 0.5 + length_penalty + recency_bonus
}
