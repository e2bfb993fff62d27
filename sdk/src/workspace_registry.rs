//! Workspace CRUD and lifecycle (component C2). The sole writer of
//! `workspaces` and of the ACL table; every mutation goes through the
//! authorization policy first and is audited regardless of outcome.

use ragcore_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use ragcore_core::error::{ErrorCode, RagError};
use ragcore_core::model::{Principal, Visibility, Workspace};
use ragcore_core::policy::{can_read, can_write, PolicyDecision};
use std::collections::HashSet;
use std::sync::Arc;
use storage::{RepoError, Repository};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkspaceRegistryError {
    #[error("workspace not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("a workspace named {0:?} already exists for this owner")]
    NameConflict(String),
    #[error("only admins may create workspaces on behalf of another owner")]
    OwnerProvisioningRestricted,
    #[error("user {0} does not exist or is not active")]
    InvalidAclMember(Uuid),
    #[error("storage error: {0}")]
    Storage(#[from] RepoError),
}

impl RagError for WorkspaceRegistryError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::AccessDenied | Self::OwnerProvisioningRestricted => ErrorCode::AccessDenied,
            Self::NameConflict(_) => ErrorCode::ConflictUnique,
            Self::InvalidAclMember(_) => ErrorCode::BadRequest,
            Self::Storage(_) => ErrorCode::Internal,
        }
    }
}

fn decision_to_result(decision: PolicyDecision) -> Result<(), WorkspaceRegistryError> {
    match decision {
        PolicyDecision::Allow => Ok(()),
        PolicyDecision::DenyNotFound => Err(WorkspaceRegistryError::NotFound),
        PolicyDecision::DenyAccessDenied => Err(WorkspaceRegistryError::AccessDenied),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct WorkspaceRegistry {
    repo: Arc<Repository>,
    audit: Arc<dyn AuditSink>,
}

impl WorkspaceRegistry {
    pub fn new(repo: Arc<Repository>, audit: Arc<dyn AuditSink>) -> Self {
        Self { repo, audit }
    }

    /// §4.2 Create: only admins provision workspaces (and choose the
    /// owner); a non-admin principal creating one for itself is the
    /// optional path the spec calls out as disabled by default.
    pub async fn create(
        &self,
        principal: &Principal,
        name: &str,
        description: Option<String>,
        owner_user_id: Uuid,
        visibility: Visibility,
    ) -> Result<Workspace, WorkspaceRegistryError> {
        if !principal.active || !principal.is_admin() {
            self.record(AuditOperation::WorkspaceCreate, AuditOutcome::Denied, principal.id, None);
            return Err(WorkspaceRegistryError::OwnerProvisioningRestricted);
        }

        self.assert_name_available(owner_user_id, name, None).await?;

        let workspace = Workspace {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description,
            owner_user_id,
            visibility,
            archived_at: None,
            created_at: now(),
        };
        self.repo.put_workspace(workspace.clone()).await?;
        self.record(AuditOperation::WorkspaceCreate, AuditOutcome::Succeeded, principal.id, Some(workspace.id));
        Ok(workspace)
    }

    /// §4.2 List visible: policy-filtered, archived excluded unless asked
    /// for, ordered `(created_at DESC, id DESC)`.
    pub async fn list_visible(&self, principal: &Principal, include_archived: bool) -> Vec<Workspace> {
        let mut visible = Vec::new();
        for workspace in self.repo.list_workspaces().await {
            if workspace.is_archived() && !include_archived {
                continue;
            }
            let acl: HashSet<Uuid> = self.repo.acl_members(workspace.id).await.into_iter().collect();
            if can_read(principal, &workspace, &acl).is_allowed() {
                visible.push(workspace);
            }
        }
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        visible
    }

    pub async fn rename(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        name: Option<&str>,
        description: Option<Option<String>>,
    ) -> Result<Workspace, WorkspaceRegistryError> {
        let mut workspace = self.get_authorized_for_write(principal, workspace_id).await?;

        if let Some(new_name) = name {
            if new_name != workspace.name {
                self.assert_name_available(workspace.owner_user_id, new_name, Some(workspace.id)).await?;
            }
            workspace.name = new_name.to_string();
        }
        if let Some(new_description) = description {
            workspace.description = new_description;
        }

        self.repo.put_workspace(workspace.clone()).await?;
        self.record(AuditOperation::WorkspaceUpdate, AuditOutcome::Succeeded, principal.id, Some(workspace.id));
        Ok(workspace)
    }

    /// Archive/unarchive manage `archived_at` itself, so they deliberately
    /// bypass `can_write`'s "no writes to an archived workspace" rule
    /// (otherwise a workspace could never be unarchived). Authorization
    /// here is owner-or-admin directly, idempotent either direction.
    pub async fn archive(&self, principal: &Principal, workspace_id: Uuid) -> Result<Workspace, WorkspaceRegistryError> {
        self.set_archived(principal, workspace_id, Some(now()), AuditOperation::WorkspaceArchive).await
    }

    pub async fn unarchive(&self, principal: &Principal, workspace_id: Uuid) -> Result<Workspace, WorkspaceRegistryError> {
        self.set_archived(principal, workspace_id, None, AuditOperation::WorkspaceUnarchive).await
    }

    async fn set_archived(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        archived_at: Option<i64>,
        operation: AuditOperation,
    ) -> Result<Workspace, WorkspaceRegistryError> {
        let mut workspace = self.repo.get_workspace(workspace_id).await.map_err(|_| WorkspaceRegistryError::NotFound)?;
        self.assert_owner_or_admin(principal, &workspace)?;

        workspace.archived_at = archived_at;
        self.repo.put_workspace(workspace.clone()).await?;
        self.record(operation, AuditOutcome::Succeeded, principal.id, Some(workspace.id));
        Ok(workspace)
    }

    /// §4.2 Publish: sets `ORG_READ`. A retained, no-longer-consulted ACL
    /// is left untouched per spec.
    pub async fn publish(&self, principal: &Principal, workspace_id: Uuid) -> Result<Workspace, WorkspaceRegistryError> {
        let mut workspace = self.get_authorized_for_write(principal, workspace_id).await?;
        workspace.visibility = Visibility::OrgRead;
        self.repo.put_workspace(workspace.clone()).await?;
        self.record(AuditOperation::WorkspacePublish, AuditOutcome::Succeeded, principal.id, Some(workspace.id));
        Ok(workspace)
    }

    /// §4.2 Share: atomic replace of the ACL set (I-ACL1). Non-empty set
    /// forces `SHARED`; an empty one reverts to `PRIVATE`.
    pub async fn share(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Workspace, WorkspaceRegistryError> {
        let mut workspace = self.get_authorized_for_write(principal, workspace_id).await?;

        for user_id in user_ids {
            let user = self.repo.get_user(*user_id).await.map_err(|_| WorkspaceRegistryError::InvalidAclMember(*user_id))?;
            if !user.active {
                return Err(WorkspaceRegistryError::InvalidAclMember(*user_id));
            }
        }

        let current_members: HashSet<Uuid> = self.repo.acl_members(workspace_id).await.into_iter().collect();
        let target_members: HashSet<Uuid> = user_ids.iter().copied().collect();

        for removed in current_members.difference(&target_members) {
            self.repo.revoke_acl(workspace_id, *removed).await?;
        }
        for added in target_members.difference(&current_members) {
            self.repo.grant_acl(workspace_id, *added).await?;
        }

        workspace.visibility = if target_members.is_empty() { Visibility::Private } else { Visibility::Shared };
        self.repo.put_workspace(workspace.clone()).await?;
        self.record(AuditOperation::WorkspaceShare, AuditOutcome::Succeeded, principal.id, Some(workspace.id));
        Ok(workspace)
    }

    async fn get_authorized_for_write(
        &self,
        principal: &Principal,
        workspace_id: Uuid,
    ) -> Result<Workspace, WorkspaceRegistryError> {
        let workspace = self.repo.get_workspace(workspace_id).await.map_err(|_| WorkspaceRegistryError::NotFound)?;
        decision_to_result(can_write(principal, &workspace))?;
        Ok(workspace)
    }

    fn assert_owner_or_admin(&self, principal: &Principal, workspace: &Workspace) -> Result<(), WorkspaceRegistryError> {
        if !principal.active {
            return Err(WorkspaceRegistryError::NotFound);
        }
        if principal.is_admin() || principal.id == workspace.owner_user_id {
            Ok(())
        } else {
            Err(WorkspaceRegistryError::AccessDenied)
        }
    }

    /// I-W1: `(owner_user_id, name)` is unique. `excluding` lets rename
    /// check against every *other* workspace the owner has.
    async fn assert_name_available(
        &self,
        owner_user_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<(), WorkspaceRegistryError> {
        let clashes = self.repo.list_workspaces().await.into_iter().any(|w| {
            w.owner_user_id == owner_user_id && w.name == name && Some(w.id) != excluding
        });
        if clashes {
            Err(WorkspaceRegistryError::NameConflict(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn record(&self, operation: AuditOperation, outcome: AuditOutcome, actor: Uuid, workspace_id: Option<Uuid>) {
        let mut event = AuditEvent::new(operation, outcome).actor(actor);
        if let Some(id) = workspace_id {
            event = event.workspace(id);
        }
        let _ = self.audit.record(event);
    }
}
