use crate::core::session::SessionStore;
use crate::directory::{DirectoryError, MembershipDirectory, OrgRole, Organization};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::warn;
use serde_json::json;
use uuid::Uuid;

/// The resolved tenant for one request: the acting user, the organization the
/// request operates within, and the user's role in it. Threaded explicitly
/// into every entity-service call; there is no ambient current-organization
/// state anywhere else.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub organization: Organization,
    pub user_id: Uuid,
    pub role: OrgRole,
}

impl TenantContext {
    pub fn org_id(&self) -> Uuid {
        self.organization.id
    }

    pub fn is_admin(&self) -> bool {
        self.role == OrgRole::Admin
    }
}

#[derive(Debug, Clone)]
pub enum TenancyError {
    /// The authenticated user has no organization to act within; fatal for
    /// any tenant-requiring route.
    NoOrganization,
    Directory(DirectoryError),
}

impl std::fmt::Display for TenancyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOrganization => write!(f, "User does not belong to any organization"),
            Self::Directory(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TenancyError {}

impl From<DirectoryError> for TenancyError {
    fn from(e: DirectoryError) -> Self {
        Self::Directory(e)
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::NoOrganization => (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "User does not belong to any organization."})),
            )
                .into_response(),
            Self::Directory(e) => e.into_response(),
        }
    }
}

/// Resolves and switches the current organization for a session.
///
/// The session value is only a write-through cache: every resolution
/// re-validates it against the user's memberships, so a stale pointer to an
/// organization the user has left behaves as if it were absent.
pub struct TenantResolver<'a> {
    directory: &'a dyn MembershipDirectory,
    sessions: &'a SessionStore,
}

impl<'a> TenantResolver<'a> {
    pub fn new(directory: &'a dyn MembershipDirectory, sessions: &'a SessionStore) -> Self {
        Self {
            directory,
            sessions,
        }
    }

    /// Resolution order: explicitly requested organization (adopted only if
    /// the user is a member), then the session's cached organization
    /// (re-validated), then the user's first membership. Returns `None` only
    /// when the user has no memberships at all.
    pub async fn resolve(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        requested_org: Option<Uuid>,
    ) -> Result<Option<TenantContext>, TenancyError> {
        if let Some(org_id) = requested_org {
            match self.context_for(user_id, org_id)? {
                Some(ctx) => {
                    self.sessions.set_current_org(session_id, org_id).await;
                    return Ok(Some(ctx));
                }
                None => {
                    warn!("user {user_id} requested org {org_id} without membership");
                }
            }
        }

        if let Some(org_id) = self.sessions.current_org(session_id).await {
            if let Some(ctx) = self.context_for(user_id, org_id)? {
                return Ok(Some(ctx));
            }
        }

        if let Some(membership) = self.directory.first_membership(user_id)? {
            if let Some(ctx) = self.context_for(user_id, membership.organization_id)? {
                self.sessions
                    .set_current_org(session_id, ctx.org_id())
                    .await;
                return Ok(Some(ctx));
            }
        }

        Ok(None)
    }

    /// Adopts `target_org` as the session's current organization if and only
    /// if the user is a member. On denial the prior session value is left
    /// untouched and `false` is returned.
    pub async fn switch(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        target_org: Uuid,
    ) -> Result<bool, TenancyError> {
        if self.directory.find_membership(user_id, target_org)?.is_none() {
            return Ok(false);
        }
        self.sessions.set_current_org(session_id, target_org).await;
        Ok(true)
    }

    fn context_for(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<TenantContext>, TenancyError> {
        let Some(membership) = self.directory.find_membership(user_id, org_id)? else {
            return Ok(None);
        };
        let Some(organization) = self.directory.organization(org_id)? else {
            return Ok(None);
        };
        Ok(Some(TenantContext {
            organization,
            user_id,
            role: membership.role,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Membership;
    use chrono::{TimeZone, Utc};

    struct InMemoryDirectory {
        memberships: Vec<Membership>,
        organizations: Vec<Organization>,
    }

    impl InMemoryDirectory {
        fn new() -> Self {
            Self {
                memberships: Vec::new(),
                organizations: Vec::new(),
            }
        }

        fn with_org(mut self, org_id: Uuid, name: &str) -> Self {
            let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
            self.organizations.push(Organization {
                id: org_id,
                name: name.to_string(),
                slug: name.to_lowercase(),
                owner_user_id: Uuid::new_v4(),
                created_at: ts,
                updated_at: ts,
            });
            self
        }

        fn with_membership(mut self, user_id: Uuid, org_id: Uuid, role: OrgRole) -> Self {
            let order = self.memberships.len() as i64;
            self.memberships.push(Membership {
                organization_id: org_id,
                user_id,
                role,
                created_at: Utc.timestamp_opt(1_700_000_000 + order, 0).unwrap(),
            });
            self
        }
    }

    impl MembershipDirectory for InMemoryDirectory {
        fn find_membership(
            &self,
            user_id: Uuid,
            org_id: Uuid,
        ) -> Result<Option<Membership>, DirectoryError> {
            Ok(self
                .memberships
                .iter()
                .find(|m| m.user_id == user_id && m.organization_id == org_id)
                .cloned())
        }

        fn first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, DirectoryError> {
            let mut mine: Vec<_> = self
                .memberships
                .iter()
                .filter(|m| m.user_id == user_id)
                .cloned()
                .collect();
            mine.sort_by_key(|m| (m.created_at, m.organization_id));
            Ok(mine.into_iter().next())
        }

        fn organization(&self, org_id: Uuid) -> Result<Option<Organization>, DirectoryError> {
            Ok(self.organizations.iter().find(|o| o.id == org_id).cloned())
        }
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_first_membership() {
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let dir = InMemoryDirectory::new()
            .with_org(org_a, "Alpha")
            .with_org(org_b, "Beta")
            .with_membership(user, org_a, OrgRole::Member)
            .with_membership(user, org_b, OrgRole::Admin);
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;

        let ctx = TenantResolver::new(&dir, &sessions)
            .resolve(sid, user, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.org_id(), org_a);
        assert_eq!(ctx.role, OrgRole::Member);
        // Resolution is written through to the session.
        assert_eq!(sessions.current_org(sid).await, Some(org_a));
    }

    #[tokio::test]
    async fn test_resolve_prefers_valid_session_org() {
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let dir = InMemoryDirectory::new()
            .with_org(org_a, "Alpha")
            .with_org(org_b, "Beta")
            .with_membership(user, org_a, OrgRole::Member)
            .with_membership(user, org_b, OrgRole::Admin);
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;
        sessions.set_current_org(sid, org_b).await;

        let ctx = TenantResolver::new(&dir, &sessions)
            .resolve(sid, user, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.org_id(), org_b);
        assert_eq!(ctx.role, OrgRole::Admin);
    }

    #[tokio::test]
    async fn test_resolve_treats_stale_session_org_as_absent() {
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_gone = Uuid::new_v4();
        let dir = InMemoryDirectory::new()
            .with_org(org_a, "Alpha")
            .with_membership(user, org_a, OrgRole::Member);
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;
        sessions.set_current_org(sid, org_gone).await;

        let ctx = TenantResolver::new(&dir, &sessions)
            .resolve(sid, user, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.org_id(), org_a);
        assert_eq!(sessions.current_org(sid).await, Some(org_a));
    }

    #[tokio::test]
    async fn test_resolve_adopts_requested_org_only_with_membership() {
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let org_foreign = Uuid::new_v4();
        let dir = InMemoryDirectory::new()
            .with_org(org_a, "Alpha")
            .with_org(org_b, "Beta")
            .with_org(org_foreign, "Foreign")
            .with_membership(user, org_a, OrgRole::Member)
            .with_membership(user, org_b, OrgRole::Admin);
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;

        let resolver = TenantResolver::new(&dir, &sessions);
        let ctx = resolver.resolve(sid, user, Some(org_b)).await.unwrap().unwrap();
        assert_eq!(ctx.org_id(), org_b);

        // A requested org without membership falls through to the session value.
        let ctx = resolver
            .resolve(sid, user, Some(org_foreign))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.org_id(), org_b);
    }

    #[tokio::test]
    async fn test_resolve_none_without_memberships() {
        let user = Uuid::new_v4();
        let dir = InMemoryDirectory::new();
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;

        let ctx = TenantResolver::new(&dir, &sessions)
            .resolve(sid, user, None)
            .await
            .unwrap();
        assert!(ctx.is_none());
    }

    #[tokio::test]
    async fn test_switch_denial_leaves_session_untouched() {
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_foreign = Uuid::new_v4();
        let dir = InMemoryDirectory::new()
            .with_org(org_a, "Alpha")
            .with_org(org_foreign, "Foreign")
            .with_membership(user, org_a, OrgRole::Member);
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;
        sessions.set_current_org(sid, org_a).await;

        let resolver = TenantResolver::new(&dir, &sessions);
        let switched = resolver.switch(sid, user, org_foreign).await.unwrap();
        assert!(!switched);
        assert_eq!(sessions.current_org(sid).await, Some(org_a));

        // A subsequent resolve still lands on the prior organization.
        let ctx = resolver.resolve(sid, user, None).await.unwrap().unwrap();
        assert_eq!(ctx.org_id(), org_a);
    }

    #[tokio::test]
    async fn test_switch_success_overwrites_session() {
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let dir = InMemoryDirectory::new()
            .with_org(org_a, "Alpha")
            .with_org(org_b, "Beta")
            .with_membership(user, org_a, OrgRole::Member)
            .with_membership(user, org_b, OrgRole::Member);
        let sessions = SessionStore::new();
        let sid = sessions.create(user).await;
        sessions.set_current_org(sid, org_a).await;

        let resolver = TenantResolver::new(&dir, &sessions);
        assert!(resolver.switch(sid, user, org_b).await.unwrap());
        assert_eq!(sessions.current_org(sid).await, Some(org_b));
    }
}
