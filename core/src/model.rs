use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// NB: these are the domain-facing types (ergonomic `Uuid` ids, serde JSON
// wire format). The write-ahead log archives a separate, primitive-typed
// record shape defined in `storage::repo` — rkyv's zero-copy validation is
// only wired up for plain scalars/strings, so the translation happens once
// at the repository boundary rather than by deriving `Archive` here.

pub const EMBEDDING_DIMENSIONS: usize = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Employee,
}

/// A resolved identity handed to the core by the identity collaborator.
/// The core never issues or validates credentials itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            active: true,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    OrgRead,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_user_id: Uuid,
    pub visibility: Visibility,
    pub archived_at: Option<i64>,
    pub created_at: i64,
}

impl Workspace {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_at, 0).unwrap_or_else(Utc::now)
    }
}

/// `(workspace_id, user_id)` ACL entry. Weak cross-reference, not ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceAclEntry {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub source: Option<String>,
    pub mime_type: String,
    pub storage_key: Option<String>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
    pub content_hash: Option<String>,
    pub uploaded_by_user_id: Uuid,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub workspace_id: Uuid,
    pub chunk_index: u32,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub active: bool,
}

impl User {
    pub fn normalized_email(&self) -> String {
        self.email.to_lowercase()
    }
}
