//! The per-document ingestion pipeline (component C4, steps 2-7). Called
//! by the worker (`jobs` crate) once it has CAS-claimed a document into
//! `PROCESSING`; this module owns everything between "we own this job"
//! and "the document is READY or FAILED", including the mid-flight
//! cancellation check for soft-deleted documents.

use crate::chunker::Chunker;
use crate::extract::{detect_content_kind, extract_docx_text, extract_pdf_text, extract_utf8, ContentKind, ExtractError};
use crate::policy::screen;
use ragcore_core::metrics::Metrics;
use ragcore_core::model::{Chunk, Document, DocumentStatus};
use ragcore_core::ports::{EmbeddingPort, ObjectStorePort, PortError};
use ragcore_core::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use storage::repo::{RepoError, Repository};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on a fetched binary's size, independent of the admission-time
/// check — a defense against a storage adapter that lies about size.
pub const MAX_FETCH_BYTES: usize = 64 * 1024 * 1024;

/// Target embedding batch size; degrades to 1 after repeated batch
/// failures, per §4.4 step 6.
pub const TARGET_EMBED_BATCH: usize = 16;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("storage error: {0}")]
    Storage(#[from] RepoError),
    #[error("object store error: {0}")]
    ObjectStore(PortError),
    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("embedding provider error: {0}")]
    Embedding(PortError),
    #[error("document was soft-deleted during processing")]
    DeletedMidFlight,
}

impl IngestionError {
    /// Sanitized message safe to persist on `documents.error_message` —
    /// never includes a provider error's raw message, which may carry
    /// upstream implementation detail.
    pub fn sanitized_message(&self) -> String {
        match self {
            IngestionError::Storage(_) => "storage error during ingestion".to_string(),
            IngestionError::ObjectStore(_) => "failed to fetch document content".to_string(),
            IngestionError::Extraction(e) => format!("text extraction failed: {e}"),
            IngestionError::Unsupported(mime) => format!("unsupported content type: {mime}"),
            IngestionError::Embedding(_) => "embedding provider error".to_string(),
            IngestionError::DeletedMidFlight => "deleted".to_string(),
        }
    }
}

pub struct IngestionPipeline {
    repo: Arc<Repository>,
    object_store: Arc<dyn ObjectStorePort>,
    embedder: Arc<dyn EmbeddingPort>,
    metrics: Arc<Metrics>,
    chunker: Chunker,
    retry_policy: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(
        repo: Arc<Repository>,
        object_store: Arc<dyn ObjectStorePort>,
        embedder: Arc<dyn EmbeddingPort>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            object_store,
            embedder,
            metrics,
            chunker: Chunker::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Runs steps 2-7 for a document already claimed (status `PROCESSING`).
    /// On any failure, transitions the document to `FAILED` with a
    /// sanitized message and returns `Ok(())` — the caller (worker) treats
    /// job-level failure as "handled", not as something to retry
    /// automatically (spec: "does not retry automatically; the document
    /// returns to the PENDING pool only via explicit reprocess").
    pub async fn process(&self, document_id: Uuid, deadline: Instant) -> Result<(), IngestionError> {
        match self.process_inner(document_id, deadline).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(document_id, &err).await;
                Ok(())
            }
        }
    }

    async fn fail(&self, document_id: Uuid, err: &IngestionError) {
        warn!(%document_id, error = %err, "ingestion job failed");
        self.metrics.record_ingestion_failure();
        let _ = self
            .repo
            .transition_document_status(
                document_id,
                DocumentStatus::Processing,
                DocumentStatus::Failed,
                Some(err.sanitized_message()),
            )
            .await;
        if matches!(err, IngestionError::DeletedMidFlight) {
            // Soft delete only sets `deleted_at`; the row (and its real
            // `workspace_id`) is still there, so re-fetch it rather than
            // guessing which workspace's index to purge partial chunks from.
            if let Ok(document) = self.repo.get_document(document_id).await {
                let _ = self.repo.replace_chunks(document_id, document.workspace_id, Vec::new()).await;
            }
        }
    }

    /// Called by the worker when the per-job wall-clock deadline (spec §5,
    /// default 10 minutes) elapses before `process` returns. Distinct from
    /// `fail` because there is no `IngestionError` value to sanitize — the
    /// pipeline future was aborted from the outside.
    pub async fn fail_timeout(&self, document_id: Uuid) {
        warn!(%document_id, "ingestion job exceeded its deadline");
        self.metrics.record_ingestion_failure();
        let _ = self
            .repo
            .transition_document_status(
                document_id,
                DocumentStatus::Processing,
                DocumentStatus::Failed,
                Some("ingestion job exceeded its timeout".to_string()),
            )
            .await;
    }

    async fn process_inner(&self, document_id: Uuid, deadline: Instant) -> Result<(), IngestionError> {
        let document = self.repo.get_document(document_id).await?;
        self.check_not_deleted(&document)?;

        let bytes = self.fetch_binary(&document).await?;
        self.check_not_deleted(&self.repo.get_document(document_id).await?)?;

        let text = self.extract_text(&document, &bytes)?;

        let mut metadata = document.metadata.clone();
        for (key, value) in screen(&text, &self.metrics) {
            metadata.insert(key, value);
        }

        let raw_chunks = self.chunker.chunk(&text);
        if raw_chunks.is_empty() {
            metadata.insert("empty_document".to_string(), "true".to_string());
        }

        self.check_not_deleted(&self.repo.get_document(document_id).await?)?;

        let embeddings = self.embed_all(&raw_chunks, deadline).await?;

        let chunks: Vec<Chunk> = raw_chunks
            .into_iter()
            .zip(embeddings.into_iter())
            .map(|(raw, embedding)| Chunk {
                id: Uuid::new_v4(),
                document_id,
                workspace_id: document.workspace_id,
                chunk_index: raw.index,
                content: raw.content,
                embedding,
                metadata: Default::default(),
            })
            .collect();

        self.check_not_deleted(&self.repo.get_document(document_id).await?)?;

        self.repo
            .replace_chunks(document_id, document.workspace_id, chunks)
            .await?;
        self.repo
            .transition_document_status(document_id, DocumentStatus::Processing, DocumentStatus::Ready, None)
            .await?;

        info!(%document_id, "ingestion job completed");
        Ok(())
    }

    fn check_not_deleted(&self, document: &Document) -> Result<(), IngestionError> {
        if document.is_deleted() {
            return Err(IngestionError::DeletedMidFlight);
        }
        Ok(())
    }

    async fn fetch_binary(&self, document: &Document) -> Result<Vec<u8>, IngestionError> {
        let Some(storage_key) = &document.storage_key else {
            return Ok(Vec::new());
        };
        let bytes = self
            .object_store
            .get(storage_key)
            .await
            .map_err(IngestionError::ObjectStore)?;
        if bytes.len() > MAX_FETCH_BYTES {
            return Err(IngestionError::ObjectStore(PortError::permanent(
                "fetched object exceeds the ingestion size guard",
            )));
        }
        Ok(bytes)
    }

    fn extract_text(&self, document: &Document, bytes: &[u8]) -> Result<String, IngestionError> {
        if bytes.is_empty() {
            return Ok(String::new());
        }
        let kind = detect_content_kind(&document.mime_type, Some(&document.title));
        match kind {
            ContentKind::Text | ContentKind::Markdown | ContentKind::Json => {
                Ok(extract_utf8(bytes)?)
            }
            ContentKind::Pdf => extract_pdf_text(bytes)
                .ok_or(ExtractError::PdfExtraction)
                .map_err(IngestionError::from),
            ContentKind::Docx => extract_docx_text(bytes).map_err(IngestionError::from),
            ContentKind::Unsupported => Err(IngestionError::Unsupported(document.mime_type.clone())),
        }
    }

    /// Embeds chunk content in batches of `TARGET_EMBED_BATCH`, degrading
    /// to batch size 1 after a batch fails even with retries exhausted, so
    /// a single malformed chunk doesn't sink an entire document's batch.
    async fn embed_all(
        &self,
        chunks: &[crate::chunker::RawChunk],
        deadline: Instant,
    ) -> Result<Vec<Vec<f32>>, IngestionError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        match self.embed_batch_with_retry(&texts, deadline).await {
            Ok(embeddings) => Ok(embeddings),
            Err(_) => {
                // Degrade to one-at-a-time.
                let mut out = Vec::with_capacity(texts.len());
                for text in &texts {
                    let single = vec![text.clone()];
                    let embedding = self
                        .embed_batch_with_retry(&single, deadline)
                        .await
                        .map_err(IngestionError::Embedding)?;
                    out.push(embedding.into_iter().next().unwrap_or_default());
                }
                Ok(out)
            }
        }
    }

    async fn embed_batch_with_retry(
        &self,
        texts: &[String],
        deadline: Instant,
    ) -> Result<Vec<Vec<f32>>, PortError> {
        retry_with_backoff(
            self.retry_policy,
            deadline,
            |err: &PortError| err.is_transient(),
            || self.embedder.embed_batch(texts),
        )
        .await
    }
}

/// Deadline for a single ingestion job, bounded by the per-job timeout
/// (spec §5 default: 10 minutes).
pub fn job_deadline(timeout: Duration) -> Instant {
    Instant::now() + timeout
}

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);
