//! Hybrid retrieval (component C5). Given a workspace-scoped query, fans
//! out to a dense (ANN cosine) channel and, in hybrid mode, a sparse
//! (BM25) channel, then fuses the two ranked lists with Reciprocal Rank
//! Fusion. Every intermediate collection carries `workspace_id` so a scan
//! can never cross a tenant boundary even by accident.

use ragcore_core::metrics::Metrics;
use ragcore_core::model::EMBEDDING_DIMENSIONS;
use ragcore_core::ports::{EmbeddingPort, PortError};
use std::collections::HashMap;
use std::sync::Arc;
use storage::Repository;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 50;
pub const DEFAULT_TOP_K: usize = 5;
const RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Dense channel only.
    Dense,
    /// Dense + sparse fused with RRF.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    Dense,
    Sparse,
    Both,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub chunk_index: u32,
    pub content: String,
    pub score: f32,
    pub source: ChunkSource,
}

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("top_k must be between {min} and {max}")]
    TopKOutOfRange { min: usize, max: usize },
    #[error("dense channel failed: {0}")]
    DenseChannelFailed(PortError),
    #[error("workspace not found")]
    WorkspaceNotFound,
}

pub struct Retriever {
    repo: Arc<Repository>,
    embedder: Arc<dyn EmbeddingPort>,
    metrics: Arc<Metrics>,
}

impl Retriever {
    pub fn new(repo: Arc<Repository>, embedder: Arc<dyn EmbeddingPort>, metrics: Arc<Metrics>) -> Self {
        Self { repo, embedder, metrics }
    }

    /// Runs the full hybrid retrieval for `query_text` against `workspace_id`.
    /// `precomputed_query_embedding` lets callers (tests, or a caller that
    /// already embedded the query) skip the embedding port round-trip.
    pub async fn retrieve(
        &self,
        workspace_id: Uuid,
        query_text: &str,
        top_k: usize,
        mode: RetrievalMode,
        precomputed_query_embedding: Option<Vec<f32>>,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        if !(MIN_TOP_K..=MAX_TOP_K).contains(&top_k) {
            return Err(RetrieverError::TopKOutOfRange {
                min: MIN_TOP_K,
                max: MAX_TOP_K,
            });
        }
        self.repo
            .get_workspace(workspace_id)
            .await
            .map_err(|_| RetrieverError::WorkspaceNotFound)?;

        let fetch_k = (top_k * 4).max(20);

        let query_embedding = match precomputed_query_embedding {
            Some(embedding) => embedding,
            None => self.embed_query(query_text).await?,
        };

        let dense_hits = self.repo.search_dense(workspace_id, &query_embedding, fetch_k).await;

        let sparse_hits = if mode == RetrievalMode::Hybrid {
            match self.repo.search_sparse(workspace_id, query_text, fetch_k).await {
                Ok(hits) => hits,
                Err(err) => {
                    warn!(%workspace_id, error = %err, "sparse channel failed, falling back to dense-only");
                    self.record_sparse_fallback();
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let fused = fuse(&dense_hits, &sparse_hits);
        let mut hydrated = self.hydrate(workspace_id, fused).await?;
        hydrated.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        hydrated.truncate(top_k);
        Ok(hydrated)
    }

    async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>, RetrieverError> {
        let batch = self
            .embedder
            .embed_batch(&[query_text.to_string()])
            .await
            .map_err(RetrieverError::DenseChannelFailed)?;
        Ok(batch.into_iter().next().unwrap_or_else(|| vec![0.0; EMBEDDING_DIMENSIONS]))
    }

    async fn hydrate(
        &self,
        workspace_id: Uuid,
        fused: Vec<(Uuid, f32, ChunkSource)>,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        let ids: Vec<Uuid> = fused.iter().map(|(id, _, _)| *id).collect();
        let chunks = self.repo.get_chunks_by_ids(workspace_id, &ids).await;

        let mut by_id: HashMap<Uuid, ragcore_core::model::Chunk> =
            chunks.into_iter().map(|c| (c.id, c)).collect();

        let mut doc_titles: HashMap<Uuid, String> = HashMap::new();
        let mut out = Vec::with_capacity(fused.len());

        for (chunk_id, score, source) in fused {
            let Some(chunk) = by_id.remove(&chunk_id) else {
                continue;
            };
            let title = match doc_titles.get(&chunk.document_id) {
                Some(t) => t.clone(),
                None => {
                    let title = self
                        .repo
                        .get_document(chunk.document_id)
                        .await
                        .map(|d| d.title)
                        .unwrap_or_default();
                    doc_titles.insert(chunk.document_id, title.clone());
                    title
                }
            };

            out.push(ScoredChunk {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                document_title: title,
                chunk_index: chunk.chunk_index,
                content: chunk.content,
                score,
                source,
            });
        }

        Ok(out)
    }

    /// Increments the `retrieval_fallback{stage=sparse}` counter. Called
    /// by `retrieve` itself when `Repository::search_sparse` reports the
    /// backend is down; kept `pub` so a caller driving the sparse backend
    /// out-of-process can record the same degradation through its own
    /// transient-failure classification.
    pub fn record_sparse_fallback(&self) {
        self.metrics.record_retrieval_fallback("sparse");
    }
}

/// Reciprocal Rank Fusion: `score(c) = sum(1 / (k + rank_i(c)))` over the
/// ranked lists a chunk appears in. A chunk in only one list gets its
/// single contribution. The final descending-score order with
/// `(document_id, chunk_index)` tie-break is applied by the caller once
/// chunks are hydrated with their document metadata; this only computes
/// scores and source tags, in no particular order.
fn fuse(dense: &[(Uuid, f32)], sparse: &[(Uuid, f32)]) -> Vec<(Uuid, f32, ChunkSource)> {
    let mut scores: HashMap<Uuid, f32> = HashMap::new();
    let mut in_dense: HashMap<Uuid, bool> = HashMap::new();
    let mut in_sparse: HashMap<Uuid, bool> = HashMap::new();

    for (rank, (id, _)) in dense.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + (rank as f32 + 1.0));
        in_dense.insert(*id, true);
    }
    for (rank, (id, _)) in sparse.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + (rank as f32 + 1.0));
        in_sparse.insert(*id, true);
    }

    scores
        .into_iter()
        .map(|(id, score)| {
            let source = match (in_dense.get(&id).copied().unwrap_or(false), in_sparse.get(&id).copied().unwrap_or(false)) {
                (true, true) => ChunkSource::Both,
                (true, false) => ChunkSource::Dense,
                (false, true) => ChunkSource::Sparse,
                (false, false) => ChunkSource::Dense,
            };
            (id, score, source)
        })
        .collect()
}
