//! The document state machine's sole writer outside the worker itself
//! (component C3): admission (`upload`/`ingest_text`), reprocess, soft
//! delete, and filtered listing. The worker (`jobs::Worker`) owns the
//! PENDING→PROCESSING→READY|FAILED transitions once a job is claimed;
//! this module owns everything a caller triggers directly.

use ingestion::extract::{detect_content_kind, ContentKind};
use ragcore_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use ragcore_core::error::{ErrorCode, RagError};
use ragcore_core::hashing::{content_hash_bytes, content_hash_text};
use ragcore_core::metrics::Metrics;
use ragcore_core::model::{Document, DocumentStatus, Principal};
use ragcore_core::policy::{can_read, can_write, PolicyDecision};
use ragcore_core::ports::{IngestJob, ObjectStorePort, PortError, QueuePort};
use std::sync::Arc;
use storage::{RepoError, Repository};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DocumentLifecycleError {
    #[error("workspace not found")]
    WorkspaceNotFound,
    #[error("document not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("payload of {actual} bytes exceeds the configured limit of {limit} bytes")]
    PayloadTooLarge { actual: u64, limit: u64 },
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
    #[error("document is not in a state that allows this operation")]
    ConflictState,
    #[error("storage error: {0}")]
    Storage(#[from] RepoError),
    #[error("queue error: {0}")]
    Queue(PortError),
    #[error("object store error: {0}")]
    ObjectStore(PortError),
}

impl RagError for DocumentLifecycleError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::WorkspaceNotFound | Self::NotFound => ErrorCode::NotFound,
            Self::AccessDenied => ErrorCode::AccessDenied,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::UnsupportedMedia(_) => ErrorCode::UnsupportedMedia,
            Self::ConflictState => ErrorCode::ConflictState,
            Self::Storage(_) | Self::Queue(_) | Self::ObjectStore(_) => ErrorCode::Internal,
        }
    }
}

fn decision_to_result(decision: PolicyDecision) -> Result<(), DocumentLifecycleError> {
    match decision {
        PolicyDecision::Allow => Ok(()),
        PolicyDecision::DenyNotFound => Err(DocumentLifecycleError::WorkspaceNotFound),
        PolicyDecision::DenyAccessDenied => Err(DocumentLifecycleError::AccessDenied),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Outcome of an admission call. `existing_document_id == document_id`
/// with `idempotent_replay = true` means the upload was a byte-identical
/// duplicate within the workspace and no new processing job was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionResult {
    pub document_id: Uuid,
    pub idempotent_replay: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentListFilter {
    pub status: Option<DocumentStatus>,
    pub tag: Option<String>,
    pub title_contains: Option<String>,
    pub include_deleted: bool,
}

pub struct DocumentLifecycle {
    repo: Arc<Repository>,
    queue: Arc<dyn QueuePort>,
    object_store: Arc<dyn ObjectStorePort>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
    max_upload_bytes: u64,
}

impl DocumentLifecycle {
    pub fn new(
        repo: Arc<Repository>,
        queue: Arc<dyn QueuePort>,
        object_store: Arc<dyn ObjectStorePort>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            repo,
            queue,
            object_store,
            audit,
            metrics,
            max_upload_bytes,
        }
    }

    /// §4.3 Admission for a binary upload.
    pub async fn upload(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        title: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        tags: Vec<String>,
    ) -> Result<AdmissionResult, DocumentLifecycleError> {
        let content_hash = content_hash_bytes(workspace_id, &bytes[..])
            .map_err(|e| DocumentLifecycleError::ObjectStore(PortError::permanent(e.to_string())))?;
        self.admit(principal, workspace_id, title, bytes, mime_type, tags, content_hash).await
    }

    /// §4.3 Admission for inline text, bypassing the MIME/extension
    /// sniffing a real binary upload needs: the caller already knows this
    /// is text.
    pub async fn ingest_text(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        title: &str,
        content: &str,
        tags: Vec<String>,
    ) -> Result<AdmissionResult, DocumentLifecycleError> {
        let content_hash = content_hash_text(workspace_id, content);
        self.admit(principal, workspace_id, title, content.as_bytes().to_vec(), "text/plain", tags, content_hash).await
    }

    async fn admit(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        title: &str,
        bytes: Vec<u8>,
        mime_type: &str,
        tags: Vec<String>,
        content_hash: String,
    ) -> Result<AdmissionResult, DocumentLifecycleError> {
        let workspace = self.repo.get_workspace(workspace_id).await.map_err(|_| DocumentLifecycleError::WorkspaceNotFound)?;
        decision_to_result(can_write(principal, &workspace))?;

        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(DocumentLifecycleError::PayloadTooLarge {
                actual: bytes.len() as u64,
                limit: self.max_upload_bytes,
            });
        }
        if detect_content_kind(mime_type, Some(title)) == ContentKind::Unsupported {
            return Err(DocumentLifecycleError::UnsupportedMedia(mime_type.to_string()));
        }

        if let Some(existing) = self.repo.find_document_by_content_hash(workspace_id, &content_hash).await {
            if !existing.is_deleted() {
                self.metrics.record_dedup_hit();
                return Ok(AdmissionResult { document_id: existing.id, idempotent_replay: true });
            }
        }

        let document_id = Uuid::new_v4();
        let storage_key = format!("documents/{workspace_id}/{document_id}");
        self.object_store.put(&storage_key, &bytes).await.map_err(DocumentLifecycleError::ObjectStore)?;

        let document = Document {
            id: document_id,
            workspace_id,
            title: title.to_string(),
            source: None,
            mime_type: mime_type.to_string(),
            storage_key: Some(storage_key),
            status: DocumentStatus::Pending,
            error_message: None,
            tags,
            content_hash: Some(content_hash),
            uploaded_by_user_id: principal.id,
            created_at: now(),
            deleted_at: None,
            metadata: Default::default(),
        };

        match self.repo.create_document(document).await {
            Ok(()) => {}
            Err(RepoError::ConflictUnique) => {
                // Lost the check-then-insert race; the winner's row is
                // authoritative and the caller sees the same idempotent
                // outcome it would have on a slower read.
                let winner = self
                    .repo
                    .find_document_by_content_hash(workspace_id, &content_hash)
                    .await
                    .ok_or(DocumentLifecycleError::WorkspaceNotFound)?;
                self.metrics.record_dedup_hit();
                return Ok(AdmissionResult { document_id: winner.id, idempotent_replay: true });
            }
            Err(other) => return Err(other.into()),
        }

        self.queue
            .enqueue(IngestJob { document_id, workspace_id, attempt: 1 })
            .await
            .map_err(DocumentLifecycleError::Queue)?;

        self.record(AuditOperation::DocumentUpload, AuditOutcome::Succeeded, principal.id, workspace_id, Some(document_id));
        Ok(AdmissionResult { document_id, idempotent_replay: false })
    }

    /// §4.3 Reprocess: allowed only from READY or FAILED. A document
    /// currently PROCESSING returns `ConflictState` rather than stealing
    /// the in-flight job (open-question resolution, see DESIGN.md).
    pub async fn reprocess(&self, principal: &Principal, document_id: Uuid) -> Result<(), DocumentLifecycleError> {
        let document = self.repo.get_document(document_id).await.map_err(|_| DocumentLifecycleError::NotFound)?;
        if document.is_deleted() {
            return Err(DocumentLifecycleError::NotFound);
        }
        let workspace = self.repo.get_workspace(document.workspace_id).await.map_err(|_| DocumentLifecycleError::WorkspaceNotFound)?;
        decision_to_result(can_write(principal, &workspace))?;

        if !matches!(document.status, DocumentStatus::Ready | DocumentStatus::Failed) {
            return Err(DocumentLifecycleError::ConflictState);
        }

        self.repo
            .transition_document_status(document_id, document.status, DocumentStatus::Pending, None)
            .await
            .map_err(|_| DocumentLifecycleError::ConflictState)?;
        self.repo.replace_chunks(document_id, document.workspace_id, Vec::new()).await?;

        self.queue
            .enqueue(IngestJob { document_id, workspace_id: document.workspace_id, attempt: 1 })
            .await
            .map_err(DocumentLifecycleError::Queue)?;

        self.record(AuditOperation::DocumentReprocess, AuditOutcome::Succeeded, principal.id, document.workspace_id, Some(document_id));
        Ok(())
    }

    /// §4.3 Soft delete: allowed in any state. Chunks are purged
    /// immediately in the same call rather than deferred to a janitorial
    /// pass (spec leaves the choice to the implementer).
    pub async fn soft_delete(&self, principal: &Principal, document_id: Uuid) -> Result<(), DocumentLifecycleError> {
        let document = self.repo.get_document(document_id).await.map_err(|_| DocumentLifecycleError::NotFound)?;
        let workspace = self.repo.get_workspace(document.workspace_id).await.map_err(|_| DocumentLifecycleError::WorkspaceNotFound)?;
        decision_to_result(can_write(principal, &workspace))?;

        self.repo.soft_delete_document(document_id, now()).await?;
        self.repo.replace_chunks(document_id, document.workspace_id, Vec::new()).await?;

        self.record(AuditOperation::DocumentDelete, AuditOutcome::Succeeded, principal.id, document.workspace_id, Some(document_id));
        Ok(())
    }

    /// §4.3 Listing: filtered by workspace, status, tag membership, and a
    /// case-insensitive title substring; ordered `(created_at DESC, id
    /// DESC)`. Soft-deleted documents are excluded unless the caller is an
    /// admin asking for them explicitly.
    pub async fn list(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        filter: DocumentListFilter,
    ) -> Result<Vec<Document>, DocumentLifecycleError> {
        let workspace = self.repo.get_workspace(workspace_id).await.map_err(|_| DocumentLifecycleError::WorkspaceNotFound)?;
        let acl = self.repo.acl_members(workspace_id).await.into_iter().collect();
        decision_to_result(can_read(principal, &workspace, &acl))?;

        let mut docs = self.repo.list_documents_by_workspace(workspace_id).await;
        if !(filter.include_deleted && principal.is_admin()) {
            docs.retain(|d| !d.is_deleted());
        }
        if let Some(status) = filter.status {
            docs.retain(|d| d.status == status);
        }
        if let Some(tag) = &filter.tag {
            docs.retain(|d| d.tags.iter().any(|t| t == tag));
        }
        if let Some(query) = &filter.title_contains {
            let needle = query.to_lowercase();
            docs.retain(|d| d.title.to_lowercase().contains(&needle));
        }
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(docs)
    }

    fn record(&self, operation: AuditOperation, outcome: AuditOutcome, actor: Uuid, workspace_id: Uuid, document_id: Option<Uuid>) {
        let mut event = AuditEvent::new(operation, outcome).actor(actor).workspace(workspace_id);
        if let Some(id) = document_id {
            event = event.document(id);
        }
        let _ = self.audit.record(event);
    }
}
