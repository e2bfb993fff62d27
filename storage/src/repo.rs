use crate::crypto::{AtRestCipher, NoOpCipher};
use crate::index::{LinearAnnIndex, SparseIndex};
use crate::snapshot::{SnapshotError, SnapshotManager};
use crate::wal::{Wal, WalError};
use ragcore_core::model::{Chunk, Document, DocumentStatus, Role, User, Visibility, Workspace};
use rkyv::ser::{serializers::AllocSerializer, Serializer};
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("Serialization error")]
    Serialization,
    #[error("Deserialization error")]
    Deserialization,
    #[error("Not found")]
    NotFound,
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Document {0} is not in the expected state for this transition")]
    ConflictState(Uuid),
    #[error("Content hash already present in workspace")]
    ConflictUnique,
    #[error("Invalid snapshot id: {0}")]
    InvalidSnapshotId(String),
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),
    #[error("Snapshot manager is not configured")]
    SnapshotNotConfigured,
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("sparse (full-text) backend is unavailable")]
    SparseBackendUnavailable,
}

// The WAL and backup snapshot formats only ever carry primitive scalars,
// strings and vectors of those: rkyv's zero-copy validation is not derived
// on the domain types in `ragcore_core::model` directly (several carry
// `Uuid`), so every record here is a flat, string-keyed projection of one.
// Conversion to/from the domain types happens once, at the repository
// boundary.

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
struct WorkspaceRecord {
    id: String,
    name: String,
    description: Option<String>,
    owner_user_id: String,
    visibility: String,
    archived_at: Option<i64>,
    created_at: i64,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
struct AclEntryRecord {
    workspace_id: String,
    user_id: String,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
struct UserRecord {
    id: String,
    email: String,
    role: String,
    active: bool,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
struct DocumentRecord {
    id: String,
    workspace_id: String,
    title: String,
    source: Option<String>,
    mime_type: String,
    storage_key: Option<String>,
    status: String,
    error_message: Option<String>,
    tags: Vec<String>,
    content_hash: Option<String>,
    uploaded_by_user_id: String,
    created_at: i64,
    deleted_at: Option<i64>,
    metadata: HashMap<String, String>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
struct ChunkRecord {
    id: String,
    document_id: String,
    workspace_id: String,
    chunk_index: u32,
    content: String,
    embedding: Vec<f32>,
    metadata: HashMap<String, String>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
enum TxOperation {
    PutWorkspace(WorkspaceRecord),
    GrantAcl(AclEntryRecord),
    RevokeAcl(AclEntryRecord),
    PutUser(UserRecord),
    InsertDocument(DocumentRecord),
    UpdateDocumentStatus {
        document_id: String,
        status: String,
        error_message: Option<String>,
    },
    SoftDeleteDocument {
        document_id: String,
        deleted_at: i64,
    },
    ReplaceChunks {
        document_id: String,
        workspace_id: String,
        chunks: Vec<ChunkRecord>,
    },
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
enum WalEntry {
    Transaction(Vec<TxOperation>),
}

/// A mutation accepted by `apply_transaction`. Operations with a
/// compare-and-swap or uniqueness precondition (document creation,
/// status transitions) are exposed as dedicated `Repository` methods
/// instead, so the precondition check and the WAL write happen under
/// the same `tx_lock` acquisition.
#[derive(Debug, Clone)]
pub enum Mutation {
    PutWorkspace(Workspace),
    GrantAcl(Uuid, Uuid),
    RevokeAcl(Uuid, Uuid),
    PutUser(User),
    ReplaceChunks(Uuid, Uuid, Vec<Chunk>),
}

struct MaterializedState {
    workspaces: HashMap<Uuid, Workspace>,
    acl: HashMap<Uuid, HashSet<Uuid>>,
    users: HashMap<Uuid, User>,
    documents: HashMap<Uuid, Document>,
    content_hash_index: HashMap<(Uuid, String), Uuid>,
    chunks_by_document: HashMap<Uuid, Vec<Chunk>>,
    dense_index: HashMap<Uuid, LinearAnnIndex>,
    sparse_index: HashMap<Uuid, SparseIndex>,
}

impl MaterializedState {
    fn empty() -> Self {
        Self {
            workspaces: HashMap::new(),
            acl: HashMap::new(),
            users: HashMap::new(),
            documents: HashMap::new(),
            content_hash_index: HashMap::new(),
            chunks_by_document: HashMap::new(),
            dense_index: HashMap::new(),
            sparse_index: HashMap::new(),
        }
    }

    fn reindex_chunks(&mut self, workspace_id: Uuid, document_id: Uuid, old: &[Chunk], new: &[Chunk]) {
        let dense = self.dense_index.entry(workspace_id).or_default();
        let sparse = self.sparse_index.entry(workspace_id).or_default();
        for chunk in old {
            dense.delete(chunk.id);
            sparse.delete(chunk.id);
        }
        for chunk in new {
            if !chunk.embedding.is_empty() {
                dense.insert(chunk.id, chunk.embedding.clone());
            }
            sparse.insert(chunk.id, &chunk.content);
        }
        if new.is_empty() {
            self.chunks_by_document.remove(&document_id);
        } else {
            self.chunks_by_document.insert(document_id, new.to_vec());
        }
    }
}

/// Immutable, point-in-time view of repository state at a given WAL LSN.
pub struct SnapshotView {
    snapshot_id: String,
    documents: HashMap<Uuid, Document>,
    chunks_by_document: HashMap<Uuid, Vec<Chunk>>,
}

impl SnapshotView {
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    pub fn list_document_ids(&self, workspace_id: Uuid) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self
            .documents
            .values()
            .filter(|doc| doc.workspace_id == workspace_id)
            .map(|doc| doc.id)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn get_documents_by_ids(&self, ids: &[Uuid]) -> Vec<Document> {
        let mut out: Vec<Document> = ids
            .iter()
            .filter_map(|id| self.documents.get(id).cloned())
            .collect();
        out.sort_by_key(|doc| doc.id);
        out
    }

    pub fn get_chunks_for_document(&self, document_id: Uuid) -> Vec<Chunk> {
        self.chunks_by_document
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }
}

pub struct Repository {
    wal: Arc<Mutex<Wal>>,
    tx_lock: Arc<Mutex<()>>,
    workspaces: Arc<RwLock<HashMap<Uuid, Workspace>>>,
    acl: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    documents: Arc<RwLock<HashMap<Uuid, Document>>>,
    content_hash_index: Arc<RwLock<HashMap<(Uuid, String), Uuid>>>,
    chunks_by_document: Arc<RwLock<HashMap<Uuid, Vec<Chunk>>>>,
    dense_index: Arc<RwLock<HashMap<Uuid, LinearAnnIndex>>>,
    sparse_index: Arc<RwLock<HashMap<Uuid, SparseIndex>>>,
    snapshot_manager: Option<SnapshotManager>,
    /// Lets callers (tests, or an ops toggle) simulate the sparse/FTS
    /// backend going down so the retriever's graceful-degradation path
    /// (spec §4.5, scenario 5) has something real to fall back from. The
    /// index itself never errors; this is the injectable failure mode.
    sparse_backend_enabled: AtomicBool,
}

impl Repository {
    pub async fn open(wal_path: impl AsRef<Path>) -> Result<Self, RepoError> {
        Self::open_with_cipher(wal_path, Arc::new(NoOpCipher)).await
    }

    pub async fn open_with_cipher(
        wal_path: impl AsRef<Path>,
        cipher: Arc<dyn AtRestCipher>,
    ) -> Result<Self, RepoError> {
        Self::open_internal(wal_path.as_ref().to_path_buf(), cipher, None).await
    }

    pub async fn open_with_snapshots(
        wal_path: impl AsRef<Path>,
        snapshot_dir: impl AsRef<Path>,
    ) -> Result<Self, RepoError> {
        Self::open_with_cipher_and_snapshots(wal_path, Arc::new(NoOpCipher), snapshot_dir).await
    }

    pub async fn open_with_cipher_and_snapshots(
        wal_path: impl AsRef<Path>,
        cipher: Arc<dyn AtRestCipher>,
        snapshot_dir: impl AsRef<Path>,
    ) -> Result<Self, RepoError> {
        let snapshot_manager = SnapshotManager::new(snapshot_dir.as_ref());
        Self::open_internal(
            wal_path.as_ref().to_path_buf(),
            cipher,
            Some(snapshot_manager),
        )
        .await
    }

    async fn open_internal(
        wal_path: PathBuf,
        cipher: Arc<dyn AtRestCipher>,
        snapshot_manager: Option<SnapshotManager>,
    ) -> Result<Self, RepoError> {
        let wal_instance = Wal::open_with_cipher(&wal_path, cipher).await?;
        let wal = Arc::new(Mutex::new(wal_instance));
        let tx_lock = Arc::new(Mutex::new(()));
        let (mut materialized, base_lsn) =
            load_materialized_state_from_backup(snapshot_manager.as_ref(), None).await?;

        {
            let mut wal_lock = wal.lock().await;
            let last_replayed_lsn = wal_lock
                .replay(|lsn, data| {
                    if lsn <= base_lsn {
                        return Ok(());
                    }
                    let entry = decode_wal_entry(&data)?;
                    apply_replayed_entry(&entry, &mut materialized)?;
                    Ok(())
                })
                .await?;

            if base_lsn > last_replayed_lsn {
                return Err(RepoError::SnapshotNotFound(format!("wal-lsn-{base_lsn}")));
            }
        }

        Ok(Self {
            wal,
            tx_lock,
            workspaces: Arc::new(RwLock::new(materialized.workspaces)),
            acl: Arc::new(RwLock::new(materialized.acl)),
            users: Arc::new(RwLock::new(materialized.users)),
            documents: Arc::new(RwLock::new(materialized.documents)),
            content_hash_index: Arc::new(RwLock::new(materialized.content_hash_index)),
            chunks_by_document: Arc::new(RwLock::new(materialized.chunks_by_document)),
            dense_index: Arc::new(RwLock::new(materialized.dense_index)),
            sparse_index: Arc::new(RwLock::new(materialized.sparse_index)),
            snapshot_manager,
            sparse_backend_enabled: AtomicBool::new(true),
        })
    }

    /// Simulates the sparse/full-text backend going down (or recovering).
    /// `search_sparse` fails with `RepoError::SparseBackendUnavailable`
    /// while disabled; the dense channel and every other operation are
    /// unaffected.
    pub fn set_sparse_backend_enabled(&self, enabled: bool) {
        self.sparse_backend_enabled.store(enabled, Ordering::SeqCst);
    }

    // --- workspaces ---

    pub async fn put_workspace(&self, workspace: Workspace) -> Result<(), RepoError> {
        self.apply_transaction(vec![Mutation::PutWorkspace(workspace)])
            .await
    }

    pub async fn get_workspace(&self, id: Uuid) -> Result<Workspace, RepoError> {
        self.workspaces
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        let mut out: Vec<Workspace> = self.workspaces.read().await.values().cloned().collect();
        out.sort_by_key(|w| w.id);
        out
    }

    pub async fn grant_acl(&self, workspace_id: Uuid, user_id: Uuid) -> Result<(), RepoError> {
        self.apply_transaction(vec![Mutation::GrantAcl(workspace_id, user_id)])
            .await
    }

    pub async fn revoke_acl(&self, workspace_id: Uuid, user_id: Uuid) -> Result<(), RepoError> {
        self.apply_transaction(vec![Mutation::RevokeAcl(workspace_id, user_id)])
            .await
    }

    pub async fn acl_members(&self, workspace_id: Uuid) -> Vec<Uuid> {
        let acl = self.acl.read().await;
        let mut out: Vec<Uuid> = acl
            .get(&workspace_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        out.sort_unstable();
        out
    }

    // --- users ---

    pub async fn put_user(&self, user: User) -> Result<(), RepoError> {
        self.apply_transaction(vec![Mutation::PutUser(user)]).await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, RepoError> {
        self.users.read().await.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    // --- documents ---

    pub async fn find_document_by_content_hash(
        &self,
        workspace_id: Uuid,
        content_hash: &str,
    ) -> Option<Document> {
        let index = self.content_hash_index.read().await;
        let id = index.get(&(workspace_id, content_hash.to_string()))?;
        self.documents.read().await.get(id).cloned()
    }

    /// Inserts a new document, atomically rejecting a duplicate `content_hash`
    /// within the same workspace.
    pub async fn create_document(&self, document: Document) -> Result<(), RepoError> {
        let _tx_guard = self.tx_lock.lock().await;

        {
            let workspaces = self.workspaces.read().await;
            if !workspaces.contains_key(&document.workspace_id) {
                return Err(RepoError::InvalidTransaction(
                    "document references a workspace that does not exist".into(),
                ));
            }
        }

        if let Some(hash) = &document.content_hash {
            let index = self.content_hash_index.read().await;
            if index.contains_key(&(document.workspace_id, hash.clone())) {
                return Err(RepoError::ConflictUnique);
            }
        }
        {
            let documents = self.documents.read().await;
            if documents.contains_key(&document.id) {
                return Err(RepoError::InvalidTransaction(
                    "document id already exists".into(),
                ));
            }
        }

        let record = document_to_record(&document);
        let operation = TxOperation::InsertDocument(record);
        self.commit_operations(vec![operation]).await?;

        let mut documents = self.documents.write().await;
        let mut hash_index = self.content_hash_index.write().await;
        if let Some(hash) = &document.content_hash {
            hash_index.insert((document.workspace_id, hash.clone()), document.id);
        }
        documents.insert(document.id, document);

        Ok(())
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document, RepoError> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    pub async fn list_documents_by_workspace(&self, workspace_id: Uuid) -> Vec<Document> {
        let mut out: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .filter(|doc| doc.workspace_id == workspace_id)
            .cloned()
            .collect();
        out.sort_by_key(|doc| doc.id);
        out
    }

    /// Compare-and-swap transition of a document's lifecycle status.
    /// Rejects with `ConflictState` if the document is not currently in
    /// `expected`, so a reprocess request racing a running job is refused
    /// rather than silently stealing the in-flight job.
    pub async fn transition_document_status(
        &self,
        document_id: Uuid,
        expected: DocumentStatus,
        new_status: DocumentStatus,
        error_message: Option<String>,
    ) -> Result<Document, RepoError> {
        let _tx_guard = self.tx_lock.lock().await;

        let current = {
            let documents = self.documents.read().await;
            documents
                .get(&document_id)
                .cloned()
                .ok_or(RepoError::NotFound)?
        };
        if current.status != expected {
            return Err(RepoError::ConflictState(document_id));
        }

        let operation = TxOperation::UpdateDocumentStatus {
            document_id: document_id.to_string(),
            status: document_status_to_str(new_status).to_string(),
            error_message: error_message.clone(),
        };
        self.commit_operations(vec![operation]).await?;

        let mut documents = self.documents.write().await;
        let updated = documents.get_mut(&document_id).ok_or(RepoError::NotFound)?;
        updated.status = new_status;
        updated.error_message = error_message;
        Ok(updated.clone())
    }

    pub async fn soft_delete_document(&self, document_id: Uuid, deleted_at: i64) -> Result<(), RepoError> {
        let _tx_guard = self.tx_lock.lock().await;

        {
            let documents = self.documents.read().await;
            if !documents.contains_key(&document_id) {
                return Err(RepoError::NotFound);
            }
        }

        let operation = TxOperation::SoftDeleteDocument {
            document_id: document_id.to_string(),
            deleted_at,
        };
        self.commit_operations(vec![operation]).await?;

        let mut documents = self.documents.write().await;
        if let Some(doc) = documents.get_mut(&document_id) {
            doc.deleted_at = Some(deleted_at);
        }
        Ok(())
    }

    // --- chunks & indexes ---

    pub async fn replace_chunks(
        &self,
        document_id: Uuid,
        workspace_id: Uuid,
        chunks: Vec<Chunk>,
    ) -> Result<(), RepoError> {
        self.apply_transaction(vec![Mutation::ReplaceChunks(
            document_id,
            workspace_id,
            chunks,
        )])
        .await
    }

    pub async fn get_chunks_for_document(&self, document_id: Uuid) -> Vec<Chunk> {
        self.chunks_by_document
            .read()
            .await
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_chunks_by_ids(&self, workspace_id: Uuid, ids: &[Uuid]) -> Vec<Chunk> {
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        self.chunks_by_document
            .read()
            .await
            .values()
            .flatten()
            .filter(|chunk| chunk.workspace_id == workspace_id && wanted.contains(&chunk.id))
            .cloned()
            .collect()
    }

    pub async fn search_dense(&self, workspace_id: Uuid, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        self.dense_index
            .read()
            .await
            .get(&workspace_id)
            .map(|index| index.search(query, k))
            .unwrap_or_default()
    }

    pub async fn search_sparse(&self, workspace_id: Uuid, query: &str, k: usize) -> Result<Vec<(Uuid, f32)>, RepoError> {
        if !self.sparse_backend_enabled.load(Ordering::SeqCst) {
            return Err(RepoError::SparseBackendUnavailable);
        }
        Ok(self
            .sparse_index
            .read()
            .await
            .get(&workspace_id)
            .map(|index| index.search(query, k))
            .unwrap_or_default())
    }

    // --- transactions ---

    /// Applies upsert-style mutations atomically within one WAL transaction
    /// boundary. Mutations with preconditions (document creation, status
    /// transitions) go through their own dedicated methods instead.
    pub async fn apply_transaction(&self, mutations: Vec<Mutation>) -> Result<(), RepoError> {
        if mutations.is_empty() {
            return Ok(());
        }

        let _tx_guard = self.tx_lock.lock().await;
        self.validate_transaction(&mutations).await?;

        let operations = mutations_to_tx_operations(&mutations);
        self.commit_operations(operations).await?;

        let mut workspaces = self.workspaces.write().await;
        let mut acl = self.acl.write().await;
        let mut users = self.users.write().await;
        let mut chunks_by_document = self.chunks_by_document.write().await;
        let mut dense_index = self.dense_index.write().await;
        let mut sparse_index = self.sparse_index.write().await;

        for mutation in mutations {
            match mutation {
                Mutation::PutWorkspace(workspace) => {
                    workspaces.insert(workspace.id, workspace);
                }
                Mutation::GrantAcl(workspace_id, user_id) => {
                    acl.entry(workspace_id).or_default().insert(user_id);
                }
                Mutation::RevokeAcl(workspace_id, user_id) => {
                    if let Some(members) = acl.get_mut(&workspace_id) {
                        members.remove(&user_id);
                    }
                }
                Mutation::PutUser(user) => {
                    users.insert(user.id, user);
                }
                Mutation::ReplaceChunks(document_id, workspace_id, new_chunks) => {
                    let old = chunks_by_document.remove(&document_id).unwrap_or_default();
                    let dense = dense_index.entry(workspace_id).or_default();
                    let sparse = sparse_index.entry(workspace_id).or_default();
                    for chunk in &old {
                        dense.delete(chunk.id);
                        sparse.delete(chunk.id);
                    }
                    for chunk in &new_chunks {
                        if !chunk.embedding.is_empty() {
                            dense.insert(chunk.id, chunk.embedding.clone());
                        }
                        sparse.insert(chunk.id, &chunk.content);
                    }
                    if !new_chunks.is_empty() {
                        chunks_by_document.insert(document_id, new_chunks);
                    }
                }
            }
        }

        Ok(())
    }

    async fn validate_transaction(&self, mutations: &[Mutation]) -> Result<(), RepoError> {
        let workspaces = self.workspaces.read().await;
        let documents = self.documents.read().await;
        let mut known_workspaces: HashSet<Uuid> = workspaces.keys().copied().collect();

        for mutation in mutations {
            match mutation {
                Mutation::PutWorkspace(workspace) => {
                    known_workspaces.insert(workspace.id);
                }
                Mutation::GrantAcl(workspace_id, _) | Mutation::RevokeAcl(workspace_id, _) => {
                    if !known_workspaces.contains(workspace_id) {
                        return Err(RepoError::InvalidTransaction(format!(
                            "workspace {workspace_id} does not exist"
                        )));
                    }
                }
                Mutation::PutUser(_) => {}
                Mutation::ReplaceChunks(document_id, workspace_id, _) => {
                    match documents.get(document_id) {
                        Some(doc) if doc.workspace_id == *workspace_id => {}
                        Some(_) => {
                            return Err(RepoError::InvalidTransaction(
                                "chunk workspace does not match document workspace".into(),
                            ))
                        }
                        None => return Err(RepoError::NotFound),
                    }
                }
            }
        }

        Ok(())
    }

    /// Serializes `operations` as a single WAL transaction record and makes
    /// it durable. Callers apply the in-memory effects themselves afterward.
    async fn commit_operations(&self, operations: Vec<TxOperation>) -> Result<(), RepoError> {
        let entry = WalEntry::Transaction(operations);
        let bytes = serialize_wal_entry(&entry)?;
        let mut wal = self.wal.lock().await;
        wal.append(&bytes).await?;
        wal.flush().await?;
        Ok(())
    }

    // --- durability: snapshots & backup ---

    pub async fn current_snapshot_id(&self) -> String {
        let wal = self.wal.lock().await;
        format!("wal-lsn-{}", wal.current_lsn())
    }

    pub async fn create_backup_snapshot(&self) -> Result<String, RepoError> {
        let snapshot_manager = self
            .snapshot_manager
            .as_ref()
            .ok_or(RepoError::SnapshotNotConfigured)?;

        let snapshot = {
            let _tx_guard = self.tx_lock.lock().await;

            let lsn = {
                let wal = self.wal.lock().await;
                wal.current_lsn()
            };

            let mut workspaces: Vec<WorkspaceRecord> = self
                .workspaces
                .read()
                .await
                .values()
                .map(workspace_to_record)
                .collect();
            workspaces.sort_by(|a, b| a.id.cmp(&b.id));

            let mut acl: Vec<AclEntryRecord> = self
                .acl
                .read()
                .await
                .iter()
                .flat_map(|(workspace_id, members)| {
                    members.iter().map(move |user_id| AclEntryRecord {
                        workspace_id: workspace_id.to_string(),
                        user_id: user_id.to_string(),
                    })
                })
                .collect();
            acl.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id).then(a.user_id.cmp(&b.user_id)));

            let mut users: Vec<UserRecord> =
                self.users.read().await.values().map(user_to_record).collect();
            users.sort_by(|a, b| a.id.cmp(&b.id));

            let mut documents: Vec<DocumentRecord> = self
                .documents
                .read()
                .await
                .values()
                .map(document_to_record)
                .collect();
            documents.sort_by(|a, b| a.id.cmp(&b.id));

            let mut chunks: Vec<ChunkRecord> = self
                .chunks_by_document
                .read()
                .await
                .values()
                .flatten()
                .map(chunk_to_record)
                .collect();
            chunks.sort_by(|a, b| a.document_id.cmp(&b.document_id).then(a.chunk_index.cmp(&b.chunk_index)));

            RepositoryBackupSnapshot {
                lsn,
                workspaces,
                acl,
                users,
                documents,
                chunks,
            }
        };

        let encoded = serialize_backup_snapshot(&snapshot)?;
        snapshot_manager
            .create_snapshot(snapshot.lsn, &encoded)
            .await?;

        Ok(format!("wal-lsn-{}", snapshot.lsn))
    }

    pub async fn restore_from_latest_backup(&self) -> Result<String, RepoError> {
        if self.snapshot_manager.is_none() {
            return Err(RepoError::SnapshotNotConfigured);
        }

        let _tx_guard = self.tx_lock.lock().await;
        let target_lsn = {
            let wal = self.wal.lock().await;
            wal.current_lsn()
        };

        let (mut materialized, base_lsn) =
            load_materialized_state_from_backup(self.snapshot_manager.as_ref(), Some(target_lsn))
                .await?;

        {
            let mut wal = self.wal.lock().await;
            wal.replay(|lsn, data| {
                if lsn <= base_lsn || lsn > target_lsn {
                    return Ok(());
                }
                let entry = decode_wal_entry(&data)?;
                apply_replayed_entry(&entry, &mut materialized)?;
                Ok(())
            })
            .await?;
        }

        *self.workspaces.write().await = materialized.workspaces;
        *self.acl.write().await = materialized.acl;
        *self.users.write().await = materialized.users;
        *self.documents.write().await = materialized.documents;
        *self.content_hash_index.write().await = materialized.content_hash_index;
        *self.chunks_by_document.write().await = materialized.chunks_by_document;
        *self.dense_index.write().await = materialized.dense_index;
        *self.sparse_index.write().await = materialized.sparse_index;

        Ok(format!("wal-lsn-{target_lsn}"))
    }

    /// Materializes an immutable read view as of `snapshot_id` (`wal-lsn-<n>`).
    pub async fn load_snapshot_view(&self, snapshot_id: &str) -> Result<SnapshotView, RepoError> {
        let target_lsn = parse_wal_snapshot_lsn(snapshot_id)
            .ok_or_else(|| RepoError::InvalidSnapshotId(snapshot_id.to_string()))?;

        let current_lsn = {
            let wal = self.wal.lock().await;
            wal.current_lsn()
        };
        if target_lsn > current_lsn {
            return Err(RepoError::SnapshotNotFound(snapshot_id.to_string()));
        }

        let (mut materialized, base_lsn) =
            load_materialized_state_from_backup(self.snapshot_manager.as_ref(), Some(target_lsn))
                .await?;

        let mut wal = self.wal.lock().await;
        wal.replay(|lsn, data| {
            if lsn <= base_lsn || lsn > target_lsn {
                return Ok(());
            }
            let entry = decode_wal_entry(&data)?;
            apply_replayed_entry(&entry, &mut materialized)?;
            Ok(())
        })
        .await?;

        Ok(SnapshotView {
            snapshot_id: snapshot_id.to_string(),
            documents: materialized.documents,
            chunks_by_document: materialized.chunks_by_document,
        })
    }
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
struct RepositoryBackupSnapshot {
    lsn: u64,
    workspaces: Vec<WorkspaceRecord>,
    acl: Vec<AclEntryRecord>,
    users: Vec<UserRecord>,
    documents: Vec<DocumentRecord>,
    chunks: Vec<ChunkRecord>,
}

fn mutations_to_tx_operations(mutations: &[Mutation]) -> Vec<TxOperation> {
    mutations
        .iter()
        .map(|mutation| match mutation {
            Mutation::PutWorkspace(workspace) => TxOperation::PutWorkspace(workspace_to_record(workspace)),
            Mutation::GrantAcl(workspace_id, user_id) => TxOperation::GrantAcl(AclEntryRecord {
                workspace_id: workspace_id.to_string(),
                user_id: user_id.to_string(),
            }),
            Mutation::RevokeAcl(workspace_id, user_id) => TxOperation::RevokeAcl(AclEntryRecord {
                workspace_id: workspace_id.to_string(),
                user_id: user_id.to_string(),
            }),
            Mutation::PutUser(user) => TxOperation::PutUser(user_to_record(user)),
            Mutation::ReplaceChunks(document_id, workspace_id, chunks) => TxOperation::ReplaceChunks {
                document_id: document_id.to_string(),
                workspace_id: workspace_id.to_string(),
                chunks: chunks.iter().map(chunk_to_record).collect(),
            },
        })
        .collect()
}

fn serialize_wal_entry(entry: &WalEntry) -> Result<Vec<u8>, RepoError> {
    let mut serializer = AllocSerializer::<4096>::default();
    serializer
        .serialize_value(entry)
        .map_err(|_| RepoError::Serialization)?;
    Ok(serializer.into_serializer().into_inner().to_vec())
}

fn serialize_backup_snapshot(snapshot: &RepositoryBackupSnapshot) -> Result<Vec<u8>, RepoError> {
    let mut serializer = AllocSerializer::<4096>::default();
    serializer
        .serialize_value(snapshot)
        .map_err(|_| RepoError::Serialization)?;
    Ok(serializer.into_serializer().into_inner().to_vec())
}

fn decode_wal_entry(data: &[u8]) -> Result<WalEntry, WalError> {
    let archived = rkyv::check_archived_root::<WalEntry>(data).map_err(|_| WalError::CorruptEntry)?;
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_: std::convert::Infallible| WalError::CorruptEntry)
}

async fn deserialize_backup_snapshot(path: &Path) -> Result<RepositoryBackupSnapshot, RepoError> {
    let bytes = fs::read(path)
        .await
        .map_err(|err| RepoError::Snapshot(SnapshotError::Io(err)))?;
    let archived = rkyv::check_archived_root::<RepositoryBackupSnapshot>(&bytes[..])
        .map_err(|_| RepoError::Deserialization)?;
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| RepoError::Deserialization)
}

async fn load_materialized_state_from_backup(
    snapshot_manager: Option<&SnapshotManager>,
    target_lsn: Option<u64>,
) -> Result<(MaterializedState, u64), RepoError> {
    let Some(manager) = snapshot_manager else {
        return Ok((MaterializedState::empty(), 0));
    };

    let selected = match target_lsn {
        Some(lsn) => manager.latest_snapshot_at_or_before(lsn).await?,
        None => manager.latest_snapshot().await?,
    };

    let Some((snapshot_lsn, path)) = selected else {
        return Ok((MaterializedState::empty(), 0));
    };

    let snapshot = deserialize_backup_snapshot(&path).await?;
    if snapshot.lsn != snapshot_lsn {
        return Err(RepoError::Deserialization);
    }

    let mut state = MaterializedState::empty();
    for record in snapshot.workspaces {
        let workspace = record_to_workspace(&record)?;
        state.workspaces.insert(workspace.id, workspace);
    }
    for record in snapshot.acl {
        let workspace_id = parse_uuid(&record.workspace_id)?;
        let user_id = parse_uuid(&record.user_id)?;
        state.acl.entry(workspace_id).or_default().insert(user_id);
    }
    for record in snapshot.users {
        let user = record_to_user(&record)?;
        state.users.insert(user.id, user);
    }
    for record in snapshot.documents {
        let document = record_to_document(&record)?;
        if let Some(hash) = &document.content_hash {
            state
                .content_hash_index
                .insert((document.workspace_id, hash.clone()), document.id);
        }
        state.documents.insert(document.id, document);
    }

    let mut by_document: HashMap<Uuid, Vec<ChunkRecord>> = HashMap::new();
    for record in snapshot.chunks {
        let document_id = parse_uuid(&record.document_id)?;
        by_document.entry(document_id).or_default().push(record);
    }
    for (document_id, records) in by_document {
        let mut chunks = Vec::with_capacity(records.len());
        for record in &records {
            chunks.push(record_to_chunk(record)?);
        }
        let workspace_id = chunks
            .first()
            .map(|c| c.workspace_id)
            .unwrap_or(Uuid::nil());
        state.reindex_chunks(workspace_id, document_id, &[], &chunks);
    }

    Ok((state, snapshot_lsn))
}

fn apply_replayed_entry(entry: &WalEntry, state: &mut MaterializedState) -> Result<(), WalError> {
    match entry {
        WalEntry::Transaction(operations) => {
            for operation in operations {
                apply_replayed_tx_operation(operation, state)?;
            }
            Ok(())
        }
    }
}

fn apply_replayed_tx_operation(operation: &TxOperation, state: &mut MaterializedState) -> Result<(), WalError> {
    match operation {
        TxOperation::PutWorkspace(record) => {
            let workspace = record_to_workspace(record).map_err(|_| WalError::CorruptEntry)?;
            state.workspaces.insert(workspace.id, workspace);
        }
        TxOperation::GrantAcl(record) => {
            let workspace_id = parse_uuid(&record.workspace_id).map_err(|_| WalError::CorruptEntry)?;
            let user_id = parse_uuid(&record.user_id).map_err(|_| WalError::CorruptEntry)?;
            state.acl.entry(workspace_id).or_default().insert(user_id);
        }
        TxOperation::RevokeAcl(record) => {
            let workspace_id = parse_uuid(&record.workspace_id).map_err(|_| WalError::CorruptEntry)?;
            let user_id = parse_uuid(&record.user_id).map_err(|_| WalError::CorruptEntry)?;
            if let Some(members) = state.acl.get_mut(&workspace_id) {
                members.remove(&user_id);
            }
        }
        TxOperation::PutUser(record) => {
            let user = record_to_user(record).map_err(|_| WalError::CorruptEntry)?;
            state.users.insert(user.id, user);
        }
        TxOperation::InsertDocument(record) => {
            let document = record_to_document(record).map_err(|_| WalError::CorruptEntry)?;
            if let Some(hash) = &document.content_hash {
                state
                    .content_hash_index
                    .insert((document.workspace_id, hash.clone()), document.id);
            }
            state.documents.insert(document.id, document);
        }
        TxOperation::UpdateDocumentStatus {
            document_id,
            status,
            error_message,
        } => {
            let id = parse_uuid(document_id).map_err(|_| WalError::CorruptEntry)?;
            let status = document_status_from_str(status).map_err(|_| WalError::CorruptEntry)?;
            if let Some(doc) = state.documents.get_mut(&id) {
                doc.status = status;
                doc.error_message = error_message.clone();
            }
        }
        TxOperation::SoftDeleteDocument {
            document_id,
            deleted_at,
        } => {
            let id = parse_uuid(document_id).map_err(|_| WalError::CorruptEntry)?;
            if let Some(doc) = state.documents.get_mut(&id) {
                doc.deleted_at = Some(*deleted_at);
            }
        }
        TxOperation::ReplaceChunks {
            document_id,
            workspace_id,
            chunks,
        } => {
            let document_id = parse_uuid(document_id).map_err(|_| WalError::CorruptEntry)?;
            let workspace_id = parse_uuid(workspace_id).map_err(|_| WalError::CorruptEntry)?;
            let mut new_chunks = Vec::with_capacity(chunks.len());
            for record in chunks {
                new_chunks.push(record_to_chunk(record).map_err(|_| WalError::CorruptEntry)?);
            }
            let old = state.chunks_by_document.remove(&document_id).unwrap_or_default();
            state.reindex_chunks(workspace_id, document_id, &old, &new_chunks);
        }
    }
    Ok(())
}

fn parse_wal_snapshot_lsn(snapshot_id: &str) -> Option<u64> {
    snapshot_id.strip_prefix("wal-lsn-")?.parse::<u64>().ok()
}

fn parse_uuid(s: &str) -> Result<Uuid, RepoError> {
    Uuid::parse_str(s).map_err(|_| RepoError::Deserialization)
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Employee => "employee",
    }
}

fn role_from_str(s: &str) -> Result<Role, RepoError> {
    match s {
        "admin" => Ok(Role::Admin),
        "employee" => Ok(Role::Employee),
        _ => Err(RepoError::Deserialization),
    }
}

fn visibility_to_str(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Private => "private",
        Visibility::OrgRead => "org_read",
        Visibility::Shared => "shared",
    }
}

fn visibility_from_str(s: &str) -> Result<Visibility, RepoError> {
    match s {
        "private" => Ok(Visibility::Private),
        "org_read" => Ok(Visibility::OrgRead),
        "shared" => Ok(Visibility::Shared),
        _ => Err(RepoError::Deserialization),
    }
}

fn document_status_to_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "PENDING",
        DocumentStatus::Processing => "PROCESSING",
        DocumentStatus::Ready => "READY",
        DocumentStatus::Failed => "FAILED",
    }
}

fn document_status_from_str(s: &str) -> Result<DocumentStatus, RepoError> {
    match s {
        "PENDING" => Ok(DocumentStatus::Pending),
        "PROCESSING" => Ok(DocumentStatus::Processing),
        "READY" => Ok(DocumentStatus::Ready),
        "FAILED" => Ok(DocumentStatus::Failed),
        _ => Err(RepoError::Deserialization),
    }
}

fn workspace_to_record(workspace: &Workspace) -> WorkspaceRecord {
    WorkspaceRecord {
        id: workspace.id.to_string(),
        name: workspace.name.clone(),
        description: workspace.description.clone(),
        owner_user_id: workspace.owner_user_id.to_string(),
        visibility: visibility_to_str(workspace.visibility).to_string(),
        archived_at: workspace.archived_at,
        created_at: workspace.created_at,
    }
}

fn record_to_workspace(record: &WorkspaceRecord) -> Result<Workspace, RepoError> {
    Ok(Workspace {
        id: parse_uuid(&record.id)?,
        name: record.name.clone(),
        description: record.description.clone(),
        owner_user_id: parse_uuid(&record.owner_user_id)?,
        visibility: visibility_from_str(&record.visibility)?,
        archived_at: record.archived_at,
        created_at: record.created_at,
    })
}

fn user_to_record(user: &User) -> UserRecord {
    UserRecord {
        id: user.id.to_string(),
        email: user.email.clone(),
        role: role_to_str(user.role).to_string(),
        active: user.active,
    }
}

fn record_to_user(record: &UserRecord) -> Result<User, RepoError> {
    Ok(User {
        id: parse_uuid(&record.id)?,
        email: record.email.clone(),
        role: role_from_str(&record.role)?,
        active: record.active,
    })
}

fn document_to_record(document: &Document) -> DocumentRecord {
    DocumentRecord {
        id: document.id.to_string(),
        workspace_id: document.workspace_id.to_string(),
        title: document.title.clone(),
        source: document.source.clone(),
        mime_type: document.mime_type.clone(),
        storage_key: document.storage_key.clone(),
        status: document_status_to_str(document.status).to_string(),
        error_message: document.error_message.clone(),
        tags: document.tags.clone(),
        content_hash: document.content_hash.clone(),
        uploaded_by_user_id: document.uploaded_by_user_id.to_string(),
        created_at: document.created_at,
        deleted_at: document.deleted_at,
        metadata: document.metadata.clone(),
    }
}

fn record_to_document(record: &DocumentRecord) -> Result<Document, RepoError> {
    Ok(Document {
        id: parse_uuid(&record.id)?,
        workspace_id: parse_uuid(&record.workspace_id)?,
        title: record.title.clone(),
        source: record.source.clone(),
        mime_type: record.mime_type.clone(),
        storage_key: record.storage_key.clone(),
        status: document_status_from_str(&record.status)?,
        error_message: record.error_message.clone(),
        tags: record.tags.clone(),
        content_hash: record.content_hash.clone(),
        uploaded_by_user_id: parse_uuid(&record.uploaded_by_user_id)?,
        created_at: record.created_at,
        deleted_at: record.deleted_at,
        metadata: record.metadata.clone(),
    })
}

fn chunk_to_record(chunk: &Chunk) -> ChunkRecord {
    ChunkRecord {
        id: chunk.id.to_string(),
        document_id: chunk.document_id.to_string(),
        workspace_id: chunk.workspace_id.to_string(),
        chunk_index: chunk.chunk_index,
        content: chunk.content.clone(),
        embedding: chunk.embedding.clone(),
        metadata: chunk.metadata.clone(),
    }
}

fn record_to_chunk(record: &ChunkRecord) -> Result<Chunk, RepoError> {
    Ok(Chunk {
        id: parse_uuid(&record.id)?,
        document_id: parse_uuid(&record.document_id)?,
        workspace_id: parse_uuid(&record.workspace_id)?,
        chunk_index: record.chunk_index,
        content: record.content.clone(),
        embedding: record.embedding.clone(),
        metadata: record.metadata.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragcore_core::model::EMBEDDING_DIMENSIONS;
    use tempfile::tempdir;

    fn test_workspace(owner: Uuid) -> Workspace {
        Workspace {
            id: Uuid::new_v4(),
            name: "Engineering".to_string(),
            description: None,
            owner_user_id: owner,
            visibility: Visibility::Private,
            archived_at: None,
            created_at: 0,
        }
    }

    fn test_document(workspace_id: Uuid, owner: Uuid, content_hash: &str) -> Document {
        Document {
            id: Uuid::new_v4(),
            workspace_id,
            title: "Runbook".to_string(),
            source: None,
            mime_type: "text/plain".to_string(),
            storage_key: Some("docs/runbook.txt".to_string()),
            status: DocumentStatus::Pending,
            error_message: None,
            tags: vec![],
            content_hash: Some(content_hash.to_string()),
            uploaded_by_user_id: owner,
            created_at: 0,
            deleted_at: None,
            metadata: HashMap::new(),
        }
    }

    fn test_chunk(document_id: Uuid, workspace_id: Uuid, index: u32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            workspace_id,
            chunk_index: index,
            content: format!("chunk body {index}"),
            embedding: vec![1.0; EMBEDDING_DIMENSIONS],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_workspace_put_and_get() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("ws.wal")).await.unwrap();
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);

        repo.put_workspace(workspace.clone()).await.unwrap();
        let fetched = repo.get_workspace(workspace.id).await.unwrap();
        assert_eq!(fetched, workspace);
    }

    #[tokio::test]
    async fn test_document_dedup_rejects_duplicate_hash_in_same_workspace() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("dedup.wal")).await.unwrap();
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);
        repo.put_workspace(workspace.clone()).await.unwrap();

        let first = test_document(workspace.id, owner, "sha256:abc");
        repo.create_document(first.clone()).await.unwrap();

        let duplicate = test_document(workspace.id, owner, "sha256:abc");
        let result = repo.create_document(duplicate).await;
        assert!(matches!(result, Err(RepoError::ConflictUnique)));

        let found = repo
            .find_document_by_content_hash(workspace.id, "sha256:abc")
            .await
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_document_status_cas_rejects_stale_expectation() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("cas.wal")).await.unwrap();
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);
        repo.put_workspace(workspace.clone()).await.unwrap();

        let document = test_document(workspace.id, owner, "sha256:def");
        repo.create_document(document.clone()).await.unwrap();

        repo.transition_document_status(
            document.id,
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            None,
        )
        .await
        .unwrap();

        let stale = repo
            .transition_document_status(
                document.id,
                DocumentStatus::Pending,
                DocumentStatus::Processing,
                None,
            )
            .await;
        assert!(matches!(stale, Err(RepoError::ConflictState(id)) if id == document.id));

        let updated = repo.get_document(document.id).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::Processing);
    }

    #[tokio::test]
    async fn test_replace_chunks_updates_dense_and_sparse_indexes() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("chunks.wal")).await.unwrap();
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);
        repo.put_workspace(workspace.clone()).await.unwrap();

        let document = test_document(workspace.id, owner, "sha256:ghi");
        repo.create_document(document.clone()).await.unwrap();

        let chunks = vec![test_chunk(document.id, workspace.id, 0)];
        repo.replace_chunks(document.id, workspace.id, chunks.clone())
            .await
            .unwrap();

        let stored = repo.get_chunks_for_document(document.id).await;
        assert_eq!(stored.len(), 1);

        let dense_hits = repo
            .search_dense(workspace.id, &vec![1.0; EMBEDDING_DIMENSIONS], 5)
            .await;
        assert_eq!(dense_hits[0].0, chunks[0].id);

        let sparse_hits = repo.search_sparse(workspace.id, "chunk body", 5).await.unwrap();
        assert_eq!(sparse_hits[0].0, chunks[0].id);

        repo.replace_chunks(document.id, workspace.id, vec![])
            .await
            .unwrap();
        assert!(repo.get_chunks_for_document(document.id).await.is_empty());
        assert!(repo.search_dense(workspace.id, &vec![1.0; EMBEDDING_DIMENSIONS], 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_sparse_fails_while_the_backend_is_disabled() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("sparse-toggle.wal")).await.unwrap();
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);
        repo.put_workspace(workspace.clone()).await.unwrap();
        let document = test_document(workspace.id, owner, "sha256:mno");
        repo.create_document(document.clone()).await.unwrap();
        repo.replace_chunks(document.id, workspace.id, vec![test_chunk(document.id, workspace.id, 0)])
            .await
            .unwrap();

        assert!(repo.search_sparse(workspace.id, "chunk body", 5).await.is_ok());

        repo.set_sparse_backend_enabled(false);
        let err = repo.search_sparse(workspace.id, "chunk body", 5).await.unwrap_err();
        assert!(matches!(err, RepoError::SparseBackendUnavailable));

        repo.set_sparse_backend_enabled(true);
        assert!(repo.search_sparse(workspace.id, "chunk body", 5).await.is_ok());
    }

    #[tokio::test]
    async fn test_replay_on_restart_restores_workspace_document_and_chunks() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("replay.wal");
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);
        let document = test_document(workspace.id, owner, "sha256:jkl");
        let chunk = test_chunk(document.id, workspace.id, 0);

        {
            let repo = Repository::open(&wal_path).await.unwrap();
            repo.put_workspace(workspace.clone()).await.unwrap();
            repo.create_document(document.clone()).await.unwrap();
            repo.replace_chunks(document.id, workspace.id, vec![chunk.clone()])
                .await
                .unwrap();
        }

        {
            let repo = Repository::open(&wal_path).await.unwrap();
            assert_eq!(repo.get_workspace(workspace.id).await.unwrap(), workspace);
            assert_eq!(repo.get_document(document.id).await.unwrap().id, document.id);
            let chunks = repo.get_chunks_for_document(document.id).await;
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].id, chunk.id);
        }
    }

    #[tokio::test]
    async fn test_acl_grant_and_revoke() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("acl.wal")).await.unwrap();
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let workspace = test_workspace(owner);
        repo.put_workspace(workspace.clone()).await.unwrap();

        repo.grant_acl(workspace.id, member).await.unwrap();
        assert_eq!(repo.acl_members(workspace.id).await, vec![member]);

        repo.revoke_acl(workspace.id, member).await.unwrap();
        assert!(repo.acl_members(workspace.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_acl_grant_rejects_unknown_workspace() {
        let dir = tempdir().unwrap();
        let repo = Repository::open(dir.path().join("acl_missing.wal")).await.unwrap();
        let result = repo.grant_acl(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(RepoError::InvalidTransaction(_))));
    }

    #[tokio::test]
    async fn test_backup_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("backup.wal");
        let snapshot_dir = dir.path().join("snapshots");
        let owner = Uuid::new_v4();
        let workspace = test_workspace(owner);

        let repo = Repository::open_with_snapshots(&wal_path, &snapshot_dir)
            .await
            .unwrap();
        repo.put_workspace(workspace.clone()).await.unwrap();
        let document = test_document(workspace.id, owner, "sha256:mno");
        repo.create_document(document.clone()).await.unwrap();
        repo.create_backup_snapshot().await.unwrap();

        repo.soft_delete_document(document.id, 42).await.unwrap();

        repo.workspaces.write().await.clear();
        repo.documents.write().await.clear();
        repo.content_hash_index.write().await.clear();

        let restored = repo.restore_from_latest_backup().await.unwrap();
        assert!(restored.starts_with("wal-lsn-"));
        assert_eq!(repo.get_workspace(workspace.id).await.unwrap(), workspace);
        // restore replays the backup plus every WAL record since, so the
        // soft-delete that happened after the backup is still reflected
        assert_eq!(repo.get_document(document.id).await.unwrap().deleted_at, Some(42));
    }
}
