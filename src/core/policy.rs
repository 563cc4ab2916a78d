//! Authorization predicates, one function per entity.
//!
//! Every check is a pure function of the already-resolved tenant context and
//! the target's fields. Checks on a target entity gate on the tenant first:
//! a target outside the current organization is denied unconditionally,
//! whatever the actor's role. Services call these uniformly; no handler
//! re-implements a role rule.

use crate::core::tenancy::TenantContext;
use crate::directory::{OrgRole, Organization};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactAction {
    View,
    Create,
    Update,
    Delete,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    View,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaAction {
    View,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgAction {
    View,
    Update,
    Delete,
    Switch,
}

fn in_current_org(ctx: &TenantContext, target_org: Option<Uuid>) -> bool {
    target_org.map_or(true, |org| org == ctx.org_id())
}

/// Contacts: Admin and Member may view; create, update, delete and duplicate
/// are Admin only. `target_org` is `None` for class-level checks (list,
/// create) and the entity's organization otherwise.
pub fn allows_contact(
    ctx: &TenantContext,
    action: ContactAction,
    target_org: Option<Uuid>,
) -> bool {
    if !in_current_org(ctx, target_org) {
        return false;
    }
    match action {
        ContactAction::View => true,
        ContactAction::Create
        | ContactAction::Update
        | ContactAction::Delete
        | ContactAction::Duplicate => ctx.is_admin(),
    }
}

/// Notes: both roles may create; viewing, updating and deleting an existing
/// note requires Admin or authorship. `target` is the note's
/// (organization_id, author_id); actions on an existing note without a target
/// are denied.
pub fn allows_note(ctx: &TenantContext, action: NoteAction, target: Option<(Uuid, Uuid)>) -> bool {
    if let Some((org, _)) = target {
        if org != ctx.org_id() {
            return false;
        }
    }
    match action {
        NoteAction::Create => true,
        NoteAction::View | NoteAction::Update | NoteAction::Delete => match target {
            Some((_, author)) => ctx.is_admin() || author == ctx.user_id,
            None => false,
        },
    }
}

/// Custom fields: both roles may view, create, update and delete, subject to
/// the tenant gate. The per-contact cap is enforced by the service, not here.
pub fn allows_meta(ctx: &TenantContext, action: MetaAction, target_org: Option<Uuid>) -> bool {
    if !in_current_org(ctx, target_org) {
        return false;
    }
    match action {
        MetaAction::View | MetaAction::Create | MetaAction::Update | MetaAction::Delete => true,
    }
}

/// Organizations are not tenant-scoped themselves; checks take the actor's
/// role in the *target* organization (None when not a member).
pub fn allows_organization(
    user_id: Uuid,
    role_in_target: Option<OrgRole>,
    org: &Organization,
    action: OrgAction,
) -> bool {
    match action {
        OrgAction::View | OrgAction::Switch => role_in_target.is_some(),
        OrgAction::Update => {
            org.owner_user_id == user_id || role_in_target == Some(OrgRole::Admin)
        }
        OrgAction::Delete => org.owner_user_id == user_id,
    }
}

/// Any authenticated user may create an organization (becoming its owner).
pub fn allows_organization_create() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx(role: OrgRole) -> TenantContext {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let org_id = Uuid::new_v4();
        TenantContext {
            organization: Organization {
                id: org_id,
                name: "Alpha".to_string(),
                slug: "alpha".to_string(),
                owner_user_id: Uuid::new_v4(),
                created_at: ts,
                updated_at: ts,
            },
            user_id: Uuid::new_v4(),
            role,
        }
    }

    fn org_owned_by(owner: Uuid) -> Organization {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Organization {
            id: Uuid::new_v4(),
            name: "Beta".to_string(),
            slug: "beta".to_string(),
            owner_user_id: owner,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_contact_matrix_admin() {
        let admin = ctx(OrgRole::Admin);
        let org = Some(admin.org_id());
        for action in [
            ContactAction::View,
            ContactAction::Create,
            ContactAction::Update,
            ContactAction::Delete,
            ContactAction::Duplicate,
        ] {
            assert!(allows_contact(&admin, action, org), "{action:?}");
        }
    }

    #[test]
    fn test_contact_matrix_member() {
        let member = ctx(OrgRole::Member);
        let org = Some(member.org_id());
        assert!(allows_contact(&member, ContactAction::View, org));
        for action in [
            ContactAction::Create,
            ContactAction::Update,
            ContactAction::Delete,
            ContactAction::Duplicate,
        ] {
            assert!(!allows_contact(&member, action, org), "{action:?}");
        }
    }

    #[test]
    fn test_tenant_mismatch_denies_regardless_of_role() {
        let admin = ctx(OrgRole::Admin);
        let foreign = Some(Uuid::new_v4());
        for action in [
            ContactAction::View,
            ContactAction::Update,
            ContactAction::Delete,
            ContactAction::Duplicate,
        ] {
            assert!(!allows_contact(&admin, action, foreign), "{action:?}");
        }
        assert!(!allows_meta(&admin, MetaAction::Delete, foreign));
        assert!(!allows_note(
            &admin,
            NoteAction::View,
            Some((foreign.unwrap(), admin.user_id))
        ));
    }

    #[test]
    fn test_note_author_can_manage_own() {
        let member = ctx(OrgRole::Member);
        let own = Some((member.org_id(), member.user_id));
        let other = Some((member.org_id(), Uuid::new_v4()));

        assert!(allows_note(&member, NoteAction::Create, None));
        for action in [NoteAction::View, NoteAction::Update, NoteAction::Delete] {
            assert!(allows_note(&member, action, own), "{action:?}");
            assert!(!allows_note(&member, action, other), "{action:?}");
        }
    }

    #[test]
    fn test_note_admin_can_manage_any_in_org() {
        let admin = ctx(OrgRole::Admin);
        let other = Some((admin.org_id(), Uuid::new_v4()));
        for action in [NoteAction::View, NoteAction::Update, NoteAction::Delete] {
            assert!(allows_note(&admin, action, other), "{action:?}");
        }
    }

    #[test]
    fn test_note_existing_without_target_denied() {
        let admin = ctx(OrgRole::Admin);
        assert!(!allows_note(&admin, NoteAction::Update, None));
    }

    #[test]
    fn test_meta_open_to_both_roles() {
        for role in [OrgRole::Admin, OrgRole::Member] {
            let c = ctx(role);
            let org = Some(c.org_id());
            assert!(allows_meta(&c, MetaAction::View, org));
            assert!(allows_meta(&c, MetaAction::Create, None));
            assert!(allows_meta(&c, MetaAction::Update, org));
            assert!(allows_meta(&c, MetaAction::Delete, org));
        }
    }

    #[test]
    fn test_organization_owner_and_admin_rules() {
        let owner = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let member = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let org = org_owned_by(owner);

        // view / switch: members only
        assert!(allows_organization(member, Some(OrgRole::Member), &org, OrgAction::View));
        assert!(allows_organization(member, Some(OrgRole::Member), &org, OrgAction::Switch));
        assert!(!allows_organization(outsider, None, &org, OrgAction::Switch));

        // update: owner or admin member
        assert!(allows_organization(owner, Some(OrgRole::Admin), &org, OrgAction::Update));
        assert!(allows_organization(admin, Some(OrgRole::Admin), &org, OrgAction::Update));
        assert!(!allows_organization(member, Some(OrgRole::Member), &org, OrgAction::Update));

        // delete: owner only
        assert!(allows_organization(owner, Some(OrgRole::Admin), &org, OrgAction::Delete));
        assert!(!allows_organization(admin, Some(OrgRole::Admin), &org, OrgAction::Delete));

        assert!(allows_organization_create());
    }
}
