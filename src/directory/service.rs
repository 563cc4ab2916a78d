use super::error::DirectoryError;
use super::types::*;
use crate::shared::utils::DbPool;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Text, Timestamptz, Uuid as DieselUuid};
use log::error;
use uuid::Uuid;

#[derive(QueryableByName)]
struct UserRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    email: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

#[derive(QueryableByName)]
struct OrganizationRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    slug: String,
    #[diesel(sql_type = DieselUuid)]
    owner_user_id: Uuid,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

#[derive(QueryableByName)]
struct MembershipRow {
    #[diesel(sql_type = DieselUuid)]
    organization_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    user_id: Uuid,
    #[diesel(sql_type = Text)]
    role: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

#[derive(QueryableByName)]
struct ExistsRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

const ORG_COLUMNS: &str = "id, name, slug, owner_user_id, created_at, updated_at";

/// Membership lookups consumed by the tenant resolver. Kept as a trait so the
/// resolver can be exercised against an in-memory directory in tests.
pub trait MembershipDirectory: Send + Sync {
    fn find_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>, DirectoryError>;

    /// The user's earliest membership, deterministic across calls
    /// (membership creation order, then organization id).
    fn first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, DirectoryError>;

    fn organization(&self, org_id: Uuid) -> Result<Option<Organization>, DirectoryError>;
}

pub struct DirectoryService {
    pool: DbPool,
}

impl DirectoryService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
        DirectoryError,
    > {
        self.pool.get().map_err(|e| {
            error!("Failed to get database connection: {e}");
            DirectoryError::DatabaseConnection
        })
    }

    pub fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, DirectoryError> {
        let mut conn = self.conn()?;
        let rows: Vec<UserRow> =
            diesel::sql_query("SELECT id, name, email, created_at FROM users WHERE id = $1")
                .bind::<DieselUuid, _>(user_id)
                .load(&mut conn)
                .map_err(|e| {
                    error!("Failed to load user: {e}");
                    DirectoryError::DatabaseConnection
                })?;
        Ok(rows.into_iter().next().map(user_from_row))
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let mut conn = self.conn()?;
        let rows: Vec<UserRow> = diesel::sql_query(
            "SELECT id, name, email, created_at FROM users WHERE lower(email) = lower($1)",
        )
        .bind::<Text, _>(email)
        .load(&mut conn)
        .map_err(|e| {
            error!("Failed to load user by email: {e}");
            DirectoryError::DatabaseConnection
        })?;
        Ok(rows.into_iter().next().map(user_from_row))
    }

    pub fn organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Organization>, DirectoryError> {
        let mut conn = self.conn()?;
        let sql = r#"
            SELECT o.id, o.name, o.slug, o.owner_user_id, o.created_at, o.updated_at
            FROM organizations o
            JOIN organization_members m ON m.organization_id = o.id
            WHERE m.user_id = $1
            ORDER BY m.created_at, o.id
        "#;
        let rows: Vec<OrganizationRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(user_id)
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to list organizations: {e}");
                DirectoryError::DatabaseConnection
            })?;
        Ok(rows.into_iter().map(org_from_row).collect())
    }

    /// Creates an organization owned by `owner_id` and attaches the owner as
    /// an Admin member, atomically.
    pub fn create_organization(
        &self,
        owner_id: Uuid,
        request: CreateOrganizationRequest,
    ) -> Result<Organization, DirectoryError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(DirectoryError::validation("name", "Name is required."));
        }
        if name.len() > 255 {
            return Err(DirectoryError::validation(
                "name",
                "Name must not exceed 255 characters.",
            ));
        }

        let slug = match request.slug {
            Some(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
            _ => self.unique_slug(&name)?,
        };

        let mut conn = self.conn()?;
        let org_id = Uuid::new_v4();

        let result = conn.transaction::<_, DieselError, _>(|conn| {
            diesel::sql_query(
                r#"
                INSERT INTO organizations (id, name, slug, owner_user_id, created_at, updated_at)
                VALUES ($1, $2, $3, $4, NOW(), NOW())
                "#,
            )
            .bind::<DieselUuid, _>(org_id)
            .bind::<Text, _>(&name)
            .bind::<Text, _>(&slug)
            .bind::<DieselUuid, _>(owner_id)
            .execute(conn)?;

            diesel::sql_query(
                r#"
                INSERT INTO organization_members (organization_id, user_id, role, created_at)
                VALUES ($1, $2, 'Admin', NOW())
                "#,
            )
            .bind::<DieselUuid, _>(org_id)
            .bind::<DieselUuid, _>(owner_id)
            .execute(conn)?;

            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some("organizations_slug_key") =>
            {
                return Err(DirectoryError::validation(
                    "slug",
                    "This slug is already taken.",
                ));
            }
            Err(e) => {
                error!("Failed to create organization: {e}");
                return Err(DirectoryError::CreateFailed);
            }
        }

        self.organization(org_id)?.ok_or(DirectoryError::CreateFailed)
    }

    /// Renames an organization. Authorization is the caller's business; this
    /// only validates and persists.
    pub fn update_organization(
        &self,
        org_id: Uuid,
        request: UpdateOrganizationRequest,
    ) -> Result<Organization, DirectoryError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(DirectoryError::validation("name", "Name is required."));
        }
        if name.len() > 255 {
            return Err(DirectoryError::validation(
                "name",
                "Name must not exceed 255 characters.",
            ));
        }

        let mut conn = self.conn()?;
        let updated = diesel::sql_query(
            "UPDATE organizations SET name = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind::<Text, _>(&name)
        .bind::<DieselUuid, _>(org_id)
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to update organization: {e}");
            DirectoryError::UpdateFailed
        })?;
        drop(conn);

        if updated == 0 {
            return Err(DirectoryError::NotFound);
        }
        self.organization(org_id)?.ok_or(DirectoryError::NotFound)
    }

    /// Deletes an organization; tenant-owned rows go with it via FK cascade.
    pub fn delete_organization(&self, org_id: Uuid) -> Result<(), DirectoryError> {
        let mut conn = self.conn()?;
        let deleted = diesel::sql_query("DELETE FROM organizations WHERE id = $1")
            .bind::<DieselUuid, _>(org_id)
            .execute(&mut conn)
            .map_err(|e| {
                error!("Failed to delete organization: {e}");
                DirectoryError::DeleteFailed
            })?;
        if deleted == 0 {
            return Err(DirectoryError::NotFound);
        }
        Ok(())
    }

    fn unique_slug(&self, name: &str) -> Result<String, DirectoryError> {
        let base = slugify(name);
        let mut candidate = base.clone();
        let mut counter = 1;
        while self.slug_exists(&candidate)? {
            candidate = format!("{base}-{counter}");
            counter += 1;
        }
        Ok(candidate)
    }

    fn slug_exists(&self, slug: &str) -> Result<bool, DirectoryError> {
        let mut conn = self.conn()?;
        let rows: Vec<ExistsRow> =
            diesel::sql_query("SELECT COUNT(*) as count FROM organizations WHERE slug = $1")
                .bind::<Text, _>(slug)
                .load(&mut conn)
                .map_err(|e| {
                    error!("Failed to check slug: {e}");
                    DirectoryError::DatabaseConnection
                })?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0) > 0)
    }
}

impl MembershipDirectory for DirectoryService {
    fn find_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>, DirectoryError> {
        let mut conn = self.conn()?;
        let rows: Vec<MembershipRow> = diesel::sql_query(
            r#"
            SELECT organization_id, user_id, role, created_at
            FROM organization_members
            WHERE user_id = $1 AND organization_id = $2
            "#,
        )
        .bind::<DieselUuid, _>(user_id)
        .bind::<DieselUuid, _>(org_id)
        .load(&mut conn)
        .map_err(|e| {
            error!("Failed to load membership: {e}");
            DirectoryError::DatabaseConnection
        })?;
        rows.into_iter().next().map(membership_from_row).transpose()
    }

    fn first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, DirectoryError> {
        let mut conn = self.conn()?;
        let rows: Vec<MembershipRow> = diesel::sql_query(
            r#"
            SELECT organization_id, user_id, role, created_at
            FROM organization_members
            WHERE user_id = $1
            ORDER BY created_at, organization_id
            LIMIT 1
            "#,
        )
        .bind::<DieselUuid, _>(user_id)
        .load(&mut conn)
        .map_err(|e| {
            error!("Failed to load first membership: {e}");
            DirectoryError::DatabaseConnection
        })?;
        rows.into_iter().next().map(membership_from_row).transpose()
    }

    fn organization(&self, org_id: Uuid) -> Result<Option<Organization>, DirectoryError> {
        let mut conn = self.conn()?;
        let rows: Vec<OrganizationRow> = diesel::sql_query(format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE id = $1"
        ))
        .bind::<DieselUuid, _>(org_id)
        .load(&mut conn)
        .map_err(|e| {
            error!("Failed to load organization: {e}");
            DirectoryError::DatabaseConnection
        })?;
        Ok(rows.into_iter().next().map(org_from_row))
    }
}

fn user_from_row(row: UserRow) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
        created_at: row.created_at,
    }
}

fn org_from_row(row: OrganizationRow) -> Organization {
    Organization {
        id: row.id,
        name: row.name,
        slug: row.slug,
        owner_user_id: row.owner_user_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn membership_from_row(row: MembershipRow) -> Result<Membership, DirectoryError> {
    let role = row.role.parse().map_err(|_| {
        error!("Unknown role '{}' on membership row", row.role);
        DirectoryError::DatabaseConnection
    })?;
    Ok(Membership {
        organization_id: row.organization_id,
        user_id: row.user_id,
        role,
        created_at: row.created_at,
    })
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "org".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
    }

    #[test]
    fn test_slugify_collapses_symbols() {
        assert_eq!(slugify("  Jane's  Shop!! "), "jane-s-shop");
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify("!!!"), "org");
    }

    #[test]
    fn test_role_parse_roundtrip() {
        assert_eq!("Admin".parse::<OrgRole>(), Ok(OrgRole::Admin));
        assert_eq!("Member".parse::<OrgRole>(), Ok(OrgRole::Member));
        assert!("owner".parse::<OrgRole>().is_err());
        assert_eq!(OrgRole::Admin.to_string(), "Admin");
    }
}
