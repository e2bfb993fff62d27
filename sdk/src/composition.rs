//! Composition root: wires the repository, the caller-supplied ports, the
//! background worker, and the retrieval/answer pipeline into one handle a
//! thin HTTP layer would hold for the life of the process. Mirrors the
//! teacher's own queue-plus-worker bootstrap (a `ChannelQueue` feeding a
//! spawned `Worker::run()`), generalized with the retrieval stack this
//! system adds on top.

use crate::document_lifecycle::DocumentLifecycle;
use crate::workspace_registry::WorkspaceRegistry;
use ingestion::IngestionPipeline;
use jobs::queue::DEFAULT_QUEUE_CAPACITY;
use jobs::{ChannelQueue, Worker};
use providers::PromptTemplateRegistry;
use ragcore_core::audit::AuditSink;
use ragcore_core::metrics::Metrics;
use ragcore_core::ports::{EmbeddingPort, LlmPort, ObjectStorePort, QueuePort};
use retrieval::context::DEFAULT_CHAR_BUDGET;
use retrieval::{AnswerGenerator, ContextBuilder, RerankMode, Reranker, Retriever};
use std::sync::Arc;
use std::time::Duration;
use storage::Repository;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct RagSystemConfig {
    pub max_upload_bytes: u64,
    pub job_timeout: Duration,
    pub rerank_mode: RerankMode,
    pub context_char_budget: usize,
    pub queue_capacity: usize,
}

impl Default for RagSystemConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 25 * 1024 * 1024,
            job_timeout: ingestion::DEFAULT_JOB_TIMEOUT,
            rerank_mode: RerankMode::Disabled,
            context_char_budget: DEFAULT_CHAR_BUDGET,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A running instance of the whole subsystem: the two service-layer
/// entry points (`workspaces`, `documents`), the answer pipeline, and the
/// background worker draining the ingestion queue. Dropping this without
/// calling [`RagSystem::shutdown`] leaves the worker task running
/// detached on the runtime.
pub struct RagSystem {
    pub repo: Arc<Repository>,
    pub workspaces: Arc<WorkspaceRegistry>,
    pub documents: Arc<DocumentLifecycle>,
    pub answers: Arc<AnswerGenerator>,
    pub metrics: Arc<Metrics>,
    worker_handle: JoinHandle<()>,
}

impl RagSystem {
    /// Constructs every collaborator and spawns the worker on the current
    /// Tokio runtime. `templates` is expected to already have an active
    /// version registered (see `providers::default_registry`).
    pub fn bootstrap(
        repo: Arc<Repository>,
        embedder: Arc<dyn EmbeddingPort>,
        llm: Arc<dyn LlmPort>,
        object_store: Arc<dyn ObjectStorePort>,
        templates: Arc<PromptTemplateRegistry>,
        audit: Arc<dyn AuditSink>,
        config: RagSystemConfig,
    ) -> Self {
        let metrics = Metrics::new();
        let queue: Arc<dyn QueuePort> = Arc::new(ChannelQueue::new(config.queue_capacity));

        let pipeline = Arc::new(IngestionPipeline::new(
            repo.clone(),
            object_store.clone(),
            embedder.clone(),
            metrics.clone(),
        ));
        let worker = Worker::new(queue.clone(), repo.clone(), pipeline).with_job_timeout(config.job_timeout);
        let worker_handle = tokio::spawn(worker.run());

        let retriever = Arc::new(Retriever::new(repo.clone(), embedder, metrics.clone()));
        let reranker = Arc::new(Reranker::new(config.rerank_mode, metrics.clone()));
        let context_builder = Arc::new(ContextBuilder::new(config.context_char_budget));
        let answers = Arc::new(AnswerGenerator::new(retriever, reranker, context_builder, llm, templates, metrics.clone()));

        let workspaces = Arc::new(WorkspaceRegistry::new(repo.clone(), audit.clone()));
        let documents = Arc::new(DocumentLifecycle::new(
            repo.clone(),
            queue,
            object_store,
            audit,
            metrics.clone(),
            config.max_upload_bytes,
        ));

        Self {
            repo,
            workspaces,
            documents,
            answers,
            metrics,
            worker_handle,
        }
    }

    /// Aborts the background worker task. Intended for test teardown and
    /// deliberate shutdown; a long-running host would instead stop
    /// enqueuing and let the queue drain on its own.
    pub fn shutdown(self) {
        self.worker_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::{default_registry, DeterministicEmbeddingProvider, DeterministicLlmProvider};
    use ragcore_core::audit::InMemoryAuditSink;
    use ragcore_core::model::{Role, User, Visibility, Workspace};
    use retrieval::RetrievalMode;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;
    use async_trait::async_trait;
    use ragcore_core::ports::PortError;
    use uuid::Uuid;

    struct InMemoryObjectStore {
        objects: tokio::sync::Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryObjectStore {
        fn new() -> Self {
            Self { objects: tokio::sync::Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl ObjectStorePort for InMemoryObjectStore {
        async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PortError> {
            self.objects.lock().await.insert(key.to_string(), bytes.to_vec());
            Ok(())
        }
        async fn get(&self, key: &str) -> Result<Vec<u8>, PortError> {
            self.objects.lock().await.get(key).cloned().ok_or_else(|| PortError::permanent("not found"))
        }
        async fn delete(&self, key: &str) -> Result<(), PortError> {
            self.objects.lock().await.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn bootstrap_ingests_end_to_end_and_answers_from_it() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(Repository::open(dir.path().join("wal.log")).await.unwrap());
        let embedder = Arc::new(DeterministicEmbeddingProvider::new("test", StdDuration::from_secs(60)));
        let llm = Arc::new(DeterministicLlmProvider::default());
        let object_store = Arc::new(InMemoryObjectStore::new());
        let templates = Arc::new(default_registry());
        let audit = Arc::new(InMemoryAuditSink::default());

        let system = RagSystem::bootstrap(repo.clone(), embedder, llm, object_store, templates, audit, RagSystemConfig::default());

        let owner = Uuid::new_v4();
        repo.put_user(User { id: owner, email: "owner@example.com".into(), role: Role::Admin, active: true }).await.unwrap();
        let principal = ragcore_core::model::Principal::new(owner, Role::Admin);

        let workspace = system.workspaces.create(&principal, "research", None, owner, Visibility::Private).await.unwrap();
        let admission = system
            .documents
            .ingest_text(&principal, workspace.id, "report.txt", "Q1 revenue was 12.3M USD", vec![])
            .await
            .unwrap();
        assert!(!admission.idempotent_replay);

        let mut doc = repo.get_document(admission.document_id).await.unwrap();
        for _ in 0..50 {
            if doc.status == ragcore_core::model::DocumentStatus::Ready {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            doc = repo.get_document(admission.document_id).await.unwrap();
        }
        assert_eq!(doc.status, ragcore_core::model::DocumentStatus::Ready);

        let response = system.answers.ask(workspace.id, "What was Q1 revenue?", 5, RetrievalMode::Dense).await.unwrap();
        assert!(!response.citations.is_empty());

        system.shutdown();
    }
}
