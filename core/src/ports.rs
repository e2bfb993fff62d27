//! Abstract collaborators this core depends on but never implements.
//!
//! Concrete adapters (a real embedding vendor, a real LLM vendor, S3, Redis)
//! live in leaf crates or are out of scope entirely; this core only needs
//! the shape of the call so the retrieval and ingestion pipelines can be
//! exercised against deterministic fakes.

use crate::error::ErrorCode;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Error returned by a port implementation. Distinct from each crate's own
/// domain error type so `core::retry::retry_with_backoff` can classify
/// transience without depending on every downstream crate.
#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct PortError {
    pub code: ErrorCode,
    pub message: String,
}

impl PortError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamTimeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamUnavailable, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamError, message)
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

/// Turns a batch of normalized text into fixed-width embeddings.
/// `embed_batch` rather than a single-text call so the ingestion worker can
/// amortize one rate-limit wait across a whole document's chunks.
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PortError>;
}

/// A single generated token, or terminal signal, from a streaming LLM call.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    Token(String),
    Done,
}

/// Buffered and streaming text generation. `generate` is used by the
/// buffered answer path; `generate_stream` feeds the `/ask/stream` path.
#[async_trait]
pub trait LlmPort: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, PortError>;

    async fn generate_stream(
        &self,
        prompt: &str,
        sink: tokio::sync::mpsc::Sender<LlmStreamEvent>,
    ) -> Result<(), PortError>;
}

/// Binary blob storage for uploaded documents. Content-addressed by the
/// caller-supplied `storage_key`, not by this port.
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PortError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, PortError>;
    async fn delete(&self, key: &str) -> Result<(), PortError>;
}

/// The single processing-job payload the API enqueues and the worker
/// dequeues. Mirrors the persisted job shape exactly; no ordering across
/// documents is implied or required.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IngestJob {
    pub document_id: Uuid,
    pub workspace_id: Uuid,
    pub attempt: u32,
}

#[async_trait]
pub trait QueuePort: Send + Sync {
    async fn enqueue(&self, job: IngestJob) -> Result<(), PortError>;
    async fn dequeue(&self) -> Result<Option<IngestJob>, PortError>;
}
