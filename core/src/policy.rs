//! Pure, side-effect-free authorization decisions (component C1).
//!
//! No I/O, no database lookups: callers pass in the already-loaded
//! `Workspace` and ACL membership set and get back a `PolicyDecision`.

use crate::model::{Principal, Role, Visibility, Workspace};
use std::collections::HashSet;
use uuid::Uuid;

/// The outcome of an authorization check. `DenyNotFound` and
/// `DenyAccessDenied` are kept distinct so a caller who isn't even
/// authorized to know a workspace exists sees `NotFound`, never
/// `AccessDenied` (no existence leak for unauthorized principals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    DenyNotFound,
    DenyAccessDenied,
}

impl PolicyDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Rule 5/6: read eligibility ignoring rules 1-2, which callers apply first
/// via [`can_read`] — kept separate so [`can_write`] never has to reason
/// about ACL membership.
fn read_eligible(principal: &Principal, workspace: &Workspace, acl_members: &HashSet<Uuid>) -> bool {
    if principal.id == workspace.owner_user_id {
        return true;
    }
    match workspace.visibility {
        Visibility::Private => false,
        Visibility::OrgRead => matches!(principal.role, Role::Admin | Role::Employee),
        Visibility::Shared => acl_members.contains(&principal.id),
    }
}

/// `can_read(principal, workspace, acl_members)`. Returns `DenyNotFound`
/// rather than `DenyAccessDenied` whenever the principal has no legitimate
/// reason to know the workspace exists, per rule ordering: inactive
/// principals and non-admin/non-owner/non-visible readers are both masked
/// as not-found so an unauthorized probe can't distinguish "denied" from
/// "doesn't exist".
pub fn can_read(
    principal: &Principal,
    workspace: &Workspace,
    acl_members: &HashSet<Uuid>,
) -> PolicyDecision {
    if !principal.active {
        return PolicyDecision::DenyNotFound;
    }
    if principal.is_admin() {
        return PolicyDecision::Allow;
    }
    if read_eligible(principal, workspace, acl_members) {
        PolicyDecision::Allow
    } else {
        PolicyDecision::DenyNotFound
    }
}

/// `can_write(principal, workspace)`. Unlike reads, a write attempt by a
/// principal who can already see the workspace (e.g. an `ORG_READ` member
/// without write rights) is a genuine `AccessDenied`, not a masked
/// `NotFound` — the caller already knows the resource exists.
pub fn can_write(principal: &Principal, workspace: &Workspace) -> PolicyDecision {
    if !principal.active {
        return PolicyDecision::DenyNotFound;
    }
    if principal.is_admin() {
        return PolicyDecision::Allow;
    }
    if workspace.is_archived() {
        return PolicyDecision::DenyAccessDenied;
    }
    if principal.id == workspace.owner_user_id {
        PolicyDecision::Allow
    } else {
        PolicyDecision::DenyAccessDenied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn principal(id: Uuid, role: Role, active: bool) -> Principal {
        Principal {
            id,
            role,
            active,
        }
    }

    fn workspace(owner: Uuid, visibility: Visibility, archived: bool) -> Workspace {
        Workspace {
            id: Uuid::new_v4(),
            name: "w".into(),
            description: None,
            owner_user_id: owner,
            visibility,
            archived_at: if archived { Some(1) } else { None },
            created_at: 0,
        }
    }

    #[test]
    fn inactive_principal_is_masked_as_not_found_on_read_and_write() {
        let owner = Uuid::new_v4();
        let ws = workspace(owner, Visibility::Private, false);
        let p = principal(owner, Role::Employee, false);
        assert_eq!(can_read(&p, &ws, &HashSet::new()), PolicyDecision::DenyNotFound);
        assert_eq!(can_write(&p, &ws), PolicyDecision::DenyNotFound);
    }

    #[test]
    fn admin_overrides_everything() {
        let ws = workspace(Uuid::new_v4(), Visibility::Private, true);
        let admin = principal(Uuid::new_v4(), Role::Admin, true);
        assert_eq!(can_read(&admin, &ws, &HashSet::new()), PolicyDecision::Allow);
        assert_eq!(can_write(&admin, &ws), PolicyDecision::Allow);
    }

    #[test]
    fn archived_workspace_denies_write_even_for_owner() {
        let owner_id = Uuid::new_v4();
        let ws = workspace(owner_id, Visibility::Private, true);
        let owner = principal(owner_id, Role::Employee, true);
        assert_eq!(can_write(&owner, &ws), PolicyDecision::DenyAccessDenied);
    }

    #[test]
    fn write_requires_exact_ownership() {
        let owner_id = Uuid::new_v4();
        let ws = workspace(owner_id, Visibility::OrgRead, false);
        let other = principal(Uuid::new_v4(), Role::Employee, true);
        assert_eq!(can_write(&other, &ws), PolicyDecision::DenyAccessDenied);
    }

    #[test]
    fn org_read_grants_read_to_any_active_employee() {
        let ws = workspace(Uuid::new_v4(), Visibility::OrgRead, false);
        let employee = principal(Uuid::new_v4(), Role::Employee, true);
        assert_eq!(can_read(&employee, &ws, &HashSet::new()), PolicyDecision::Allow);
    }

    #[test]
    fn shared_grants_read_only_to_acl_members() {
        let ws = workspace(Uuid::new_v4(), Visibility::Shared, false);
        let member_id = Uuid::new_v4();
        let stranger = principal(Uuid::new_v4(), Role::Employee, true);
        let member = principal(member_id, Role::Employee, true);
        let acl = HashSet::from([member_id]);

        assert_eq!(can_read(&stranger, &ws, &acl), PolicyDecision::DenyNotFound);
        assert_eq!(can_read(&member, &ws, &acl), PolicyDecision::Allow);
    }

    #[test]
    fn private_grants_read_only_to_owner() {
        let owner_id = Uuid::new_v4();
        let ws = workspace(owner_id, Visibility::Private, false);
        let owner = principal(owner_id, Role::Employee, true);
        let stranger = principal(Uuid::new_v4(), Role::Employee, true);
        assert_eq!(can_read(&owner, &ws, &HashSet::new()), PolicyDecision::Allow);
        assert_eq!(can_read(&stranger, &ws, &HashSet::new()), PolicyDecision::DenyNotFound);
    }
}
