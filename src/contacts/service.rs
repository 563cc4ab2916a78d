use super::error::ContactsError;
use super::types::*;
use crate::audit::AuditLogger;
use crate::core::policy::{self, ContactAction};
use crate::core::tenancy::TenantContext;
use crate::shared::utils::DbPool;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Nullable, Text, Timestamptz, Uuid as DieselUuid};
use log::{error, warn};
use serde_json::json;
use uuid::Uuid;

#[derive(QueryableByName)]
struct ContactRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    organization_id: Uuid,
    #[diesel(sql_type = Text)]
    first_name: String,
    #[diesel(sql_type = Text)]
    last_name: String,
    #[diesel(sql_type = Nullable<Text>)]
    email: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    phone: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avatar_path: Option<String>,
    #[diesel(sql_type = DieselUuid)]
    created_by: Uuid,
    #[diesel(sql_type = DieselUuid)]
    updated_by: Uuid,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

const CONTACT_COLUMNS: &str = "id, organization_id, first_name, last_name, email, phone, \
     avatar_path, created_by, updated_by, created_at, updated_at";

/// Lowercased, trimmed form used for all email comparisons and storage.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

const MAX_PAGE: i64 = 1_000_000;

/// Clamps caller-supplied pagination to (page, per_page, offset). The upper
/// page bound keeps the offset arithmetic far away from i64 overflow on
/// hostile query strings.
fn page_window(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = per_page.unwrap_or(25).clamp(1, 100);
    (page, per_page, (page - 1) * per_page)
}

/// The explicit field allowlist for the duplicate (copy) operation: name and
/// phone carry over, email and avatar are always reset so the copy can never
/// collide with the dedup guard or share a blob.
pub fn duplicate_source(contact: &Contact) -> CreateContactRequest {
    CreateContactRequest {
        first_name: contact.first_name.clone(),
        last_name: contact.last_name.clone(),
        email: None,
        phone: contact.phone.clone(),
    }
}

pub struct ContactsService {
    pool: DbPool,
    audit: AuditLogger,
}

impl ContactsService {
    pub fn new(pool: DbPool, audit: AuditLogger) -> Self {
        Self { pool, audit }
    }

    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
        ContactsError,
    > {
        self.pool.get().map_err(|e| {
            error!("Failed to get database connection: {e}");
            ContactsError::DatabaseConnection
        })
    }

    /// Creates a contact in the current organization. A duplicate email
    /// (case-insensitive, within the organization) is reported as a conflict
    /// carrying the existing contact's id; the partial unique index is the
    /// authoritative guard behind the friendlier pre-check.
    pub fn create_contact(
        &self,
        ctx: &TenantContext,
        request: CreateContactRequest,
    ) -> Result<Contact, ContactsError> {
        if !policy::allows_contact(ctx, ContactAction::Create, None) {
            return Err(ContactsError::Denied);
        }

        let first_name = required_name(&request.first_name, "first_name")?;
        let last_name = required_name(&request.last_name, "last_name")?;
        let email = validated_email(request.email.as_deref())?;
        let phone = optional_trimmed(request.phone.as_deref(), "phone")?;

        if let Some(ref email) = email {
            if let Some(existing) = self.find_by_email(ctx, email)? {
                return Err(self.duplicate_blocked(ctx, email, existing.id));
            }
        }

        let id = Uuid::new_v4();
        let mut conn = self.conn()?;
        let inserted = diesel::sql_query(
            r#"
            INSERT INTO contacts (
                id, organization_id, first_name, last_name, email, phone,
                created_by, updated_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7, NOW(), NOW())
            "#,
        )
        .bind::<DieselUuid, _>(id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .bind::<Text, _>(&first_name)
        .bind::<Text, _>(&last_name)
        .bind::<Nullable<Text>, _>(email.as_deref())
        .bind::<Nullable<Text>, _>(phone.as_deref())
        .bind::<DieselUuid, _>(ctx.user_id)
        .execute(&mut conn);

        match inserted {
            Ok(_) => {}
            // Lost the race against a concurrent create with the same email;
            // surface the same conflict the pre-check would have produced.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some("contacts_org_email_key") =>
            {
                drop(conn);
                let email = email.unwrap_or_default();
                let existing = self
                    .find_by_email(ctx, &email)?
                    .ok_or(ContactsError::CreateFailed)?;
                return Err(self.duplicate_blocked(ctx, &email, existing.id));
            }
            Err(e) => {
                error!("Failed to create contact: {e}");
                return Err(ContactsError::CreateFailed);
            }
        }
        drop(conn);

        self.get_contact(ctx, id)
    }

    /// Scoped lookup: a contact outside the current organization is reported
    /// as not found, independent of any policy check.
    pub fn get_contact(&self, ctx: &TenantContext, contact_id: Uuid) -> Result<Contact, ContactsError> {
        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL"
        );
        let rows: Vec<ContactRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(contact_id)
            .bind::<DieselUuid, _>(ctx.org_id())
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to get contact: {e}");
                ContactsError::DatabaseConnection
            })?;

        let row = rows.into_iter().next().ok_or(ContactsError::NotFound)?;
        let contact = contact_from_row(row);

        if !policy::allows_contact(ctx, ContactAction::View, Some(contact.organization_id)) {
            return Err(ContactsError::NotFound);
        }
        Ok(contact)
    }

    pub fn list_contacts(
        &self,
        ctx: &TenantContext,
        query: ContactListQuery,
    ) -> Result<ContactListResponse, ContactsError> {
        if !policy::allows_contact(ctx, ContactAction::View, None) {
            return Err(ContactsError::Denied);
        }

        let mut conn = self.conn()?;
        let (page, per_page, offset) = page_window(query.page, query.per_page);

        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let where_clause = if search.is_some() {
            "organization_id = $1 AND deleted_at IS NULL AND \
             (first_name ILIKE '%' || $2 || '%' OR last_name ILIKE '%' || $2 || '%' \
              OR email ILIKE '%' || $2 || '%')"
        } else {
            "organization_id = $1 AND deleted_at IS NULL"
        };

        let count_sql = format!("SELECT COUNT(*) as count FROM contacts WHERE {where_clause}");
        let limit_param = if search.is_some() { 3 } else { 2 };
        let list_sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE {where_clause} \
             ORDER BY first_name, last_name LIMIT ${limit_param} OFFSET ${}",
            limit_param + 1
        );

        let mut count_query = diesel::sql_query(count_sql)
            .bind::<DieselUuid, _>(ctx.org_id())
            .into_boxed();
        let mut list_query = diesel::sql_query(list_sql)
            .bind::<DieselUuid, _>(ctx.org_id())
            .into_boxed();

        if let Some(search) = search {
            count_query = count_query.bind::<Text, _>(search.to_string());
            list_query = list_query.bind::<Text, _>(search.to_string());
        }
        list_query = list_query
            .bind::<BigInt, _>(per_page)
            .bind::<BigInt, _>(offset);

        let count_rows: Vec<CountRow> = count_query.load(&mut conn).map_err(|e| {
            error!("Failed to count contacts: {e}");
            ContactsError::DatabaseConnection
        })?;
        let total_count = count_rows.first().map(|r| r.count).unwrap_or(0);

        let rows: Vec<ContactRow> = list_query.load(&mut conn).map_err(|e| {
            error!("Failed to list contacts: {e}");
            ContactsError::DatabaseConnection
        })?;
        let contacts: Vec<Contact> = rows.into_iter().map(contact_from_row).collect();

        Ok(ContactListResponse {
            contacts,
            total_count,
            page,
            per_page,
            total_pages: (total_count + per_page - 1) / per_page,
        })
    }

    pub fn update_contact(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        request: UpdateContactRequest,
    ) -> Result<Contact, ContactsError> {
        let existing = self.get_contact(ctx, contact_id)?;
        if !policy::allows_contact(ctx, ContactAction::Update, Some(existing.organization_id)) {
            return Err(ContactsError::Denied);
        }

        let first_name = match request.first_name {
            Some(ref v) => required_name(v, "first_name")?,
            None => existing.first_name.clone(),
        };
        let last_name = match request.last_name {
            Some(ref v) => required_name(v, "last_name")?,
            None => existing.last_name.clone(),
        };
        let email = match request.email {
            Some(ref v) => validated_email(Some(v))?,
            None => existing.email.clone(),
        };
        let phone = match request.phone {
            Some(ref v) => optional_trimmed(Some(v), "phone")?,
            None => existing.phone.clone(),
        };

        if let Some(ref email) = email {
            if let Some(other) = self.find_by_email(ctx, email)? {
                if other.id != contact_id {
                    return Err(self.duplicate_blocked(ctx, email, other.id));
                }
            }
        }

        let mut conn = self.conn()?;
        let updated = diesel::sql_query(
            r#"
            UPDATE contacts
            SET first_name = $1, last_name = $2, email = $3, phone = $4,
                updated_by = $5, updated_at = NOW()
            WHERE id = $6 AND organization_id = $7 AND deleted_at IS NULL
            "#,
        )
        .bind::<Text, _>(&first_name)
        .bind::<Text, _>(&last_name)
        .bind::<Nullable<Text>, _>(email.as_deref())
        .bind::<Nullable<Text>, _>(phone.as_deref())
        .bind::<DieselUuid, _>(ctx.user_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn);

        match updated {
            Ok(_) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some("contacts_org_email_key") =>
            {
                drop(conn);
                let email = email.unwrap_or_default();
                let other = self
                    .find_by_email(ctx, &email)?
                    .ok_or(ContactsError::UpdateFailed)?;
                return Err(self.duplicate_blocked(ctx, &email, other.id));
            }
            Err(e) => {
                error!("Failed to update contact: {e}");
                return Err(ContactsError::UpdateFailed);
            }
        }
        drop(conn);

        self.get_contact(ctx, contact_id)
    }

    /// Soft delete. Returns the deleted contact so the caller can release its
    /// avatar blob.
    pub fn delete_contact(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
    ) -> Result<Contact, ContactsError> {
        let existing = self.get_contact(ctx, contact_id)?;
        if !policy::allows_contact(ctx, ContactAction::Delete, Some(existing.organization_id)) {
            return Err(ContactsError::Denied);
        }

        let mut conn = self.conn()?;
        diesel::sql_query(
            r#"
            UPDATE contacts
            SET deleted_at = NOW(), updated_by = $1, updated_at = NOW()
            WHERE id = $2 AND organization_id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind::<DieselUuid, _>(ctx.user_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to delete contact: {e}");
            ContactsError::DeleteFailed
        })?;

        Ok(existing)
    }

    /// Immediate server-side clone under the same organization, attributed to
    /// the duplicating actor. Field set is the explicit allowlist in
    /// [`duplicate_source`].
    pub fn duplicate_contact(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
    ) -> Result<Contact, ContactsError> {
        let existing = self.get_contact(ctx, contact_id)?;
        if !policy::allows_contact(ctx, ContactAction::Duplicate, Some(existing.organization_id)) {
            return Err(ContactsError::Denied);
        }
        self.create_contact(ctx, duplicate_source(&existing))
    }

    pub fn set_avatar(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        avatar_path: Option<&str>,
    ) -> Result<Contact, ContactsError> {
        let existing = self.get_contact(ctx, contact_id)?;
        if !policy::allows_contact(ctx, ContactAction::Update, Some(existing.organization_id)) {
            return Err(ContactsError::Denied);
        }

        let mut conn = self.conn()?;
        diesel::sql_query(
            r#"
            UPDATE contacts
            SET avatar_path = $1, updated_by = $2, updated_at = NOW()
            WHERE id = $3 AND organization_id = $4 AND deleted_at IS NULL
            "#,
        )
        .bind::<Nullable<Text>, _>(avatar_path)
        .bind::<DieselUuid, _>(ctx.user_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to update avatar: {e}");
            ContactsError::UpdateFailed
        })?;
        drop(conn);

        self.get_contact(ctx, contact_id)
    }

    pub fn find_by_email(
        &self,
        ctx: &TenantContext,
        email: &str,
    ) -> Result<Option<Contact>, ContactsError> {
        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE organization_id = $1 AND lower(email) = $2 AND deleted_at IS NULL"
        );
        let rows: Vec<ContactRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(ctx.org_id())
            .bind::<Text, _>(normalize_email(email))
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to look up contact by email: {e}");
                ContactsError::DatabaseConnection
            })?;
        Ok(rows.into_iter().next().map(contact_from_row))
    }

    /// Cross-organization listing. The only read path without the tenant
    /// filter, reserved for the admin debug endpoint.
    pub fn list_contacts_unscoped(&self, limit: i64) -> Result<Vec<Contact>, ContactsError> {
        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT $1"
        );
        let rows: Vec<ContactRow> = diesel::sql_query(sql)
            .bind::<BigInt, _>(limit.clamp(1, 1000))
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to list contacts unscoped: {e}");
                ContactsError::DatabaseConnection
            })?;
        Ok(rows.into_iter().map(contact_from_row).collect())
    }

    fn duplicate_blocked(
        &self,
        ctx: &TenantContext,
        email: &str,
        existing_contact_id: Uuid,
    ) -> ContactsError {
        warn!(
            "duplicate contact blocked in org {} for {email}",
            ctx.org_id()
        );
        self.audit.record(
            "duplicate_contact_blocked",
            json!({
                "organization_id": ctx.org_id(),
                "email": email,
                "user_id": ctx.user_id,
            }),
        );
        ContactsError::DuplicateEmail {
            existing_contact_id,
        }
    }
}

fn contact_from_row(row: ContactRow) -> Contact {
    Contact {
        id: row.id,
        organization_id: row.organization_id,
        first_name: row.first_name,
        last_name: row.last_name,
        email: row.email,
        phone: row.phone,
        avatar_path: row.avatar_path,
        created_by: row.created_by,
        updated_by: row.updated_by,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn required_name(value: &str, field: &str) -> Result<String, ContactsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ContactsError::validation(
            field,
            "This field is required.",
        ));
    }
    if trimmed.len() > 255 {
        return Err(ContactsError::validation(
            field,
            "Must not exceed 255 characters.",
        ));
    }
    Ok(trimmed.to_string())
}

fn optional_trimmed(value: Option<&str>, field: &str) -> Result<Option<String>, ContactsError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > 255 => Err(ContactsError::validation(
            field,
            "Must not exceed 255 characters.",
        )),
        Some(v) => Ok(Some(v.to_string())),
    }
}

fn validated_email(value: Option<&str>) -> Result<Option<String>, ContactsError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let normalized = normalize_email(raw);
    if normalized.is_empty() {
        return Ok(None);
    }
    if normalized.len() > 255 {
        return Err(ContactsError::validation(
            "email",
            "Must not exceed 255 characters.",
        ));
    }
    let valid = normalized
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid {
        return Err(ContactsError::validation(
            "email",
            "Please enter a valid email address.",
        ));
    }
    Ok(Some(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_clamps_hostile_input() {
        // i64::MAX as a page number must not overflow the offset.
        let (page, per_page, offset) = page_window(Some(i64::MAX), None);
        assert_eq!(page, MAX_PAGE);
        assert_eq!(per_page, 25);
        assert_eq!(offset, (MAX_PAGE - 1) * 25);

        let (page, _, offset) = page_window(Some(-7), Some(i64::MAX));
        assert_eq!(page, 1);
        assert_eq!(offset, 0);

        let (page, per_page, offset) = page_window(Some(3), Some(10));
        assert_eq!((page, per_page, offset), (3, 10, 20));
    }

    #[test]
    fn test_normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  JANE@Example.COM "), "jane@example.com");
    }

    #[test]
    fn test_validated_email_accepts_variants() {
        assert_eq!(
            validated_email(Some("JANE@EXAMPLE.COM")).unwrap(),
            Some("jane@example.com".to_string())
        );
        assert_eq!(validated_email(Some("   ")).unwrap(), None);
        assert_eq!(validated_email(None).unwrap(), None);
    }

    #[test]
    fn test_validated_email_rejects_malformed() {
        assert!(validated_email(Some("not-an-email")).is_err());
        assert!(validated_email(Some("a@nodot")).is_err());
    }

    #[test]
    fn test_required_name_rejects_blank() {
        assert!(required_name("  ", "first_name").is_err());
        assert_eq!(required_name(" Jane ", "first_name").unwrap(), "Jane");
    }

    #[test]
    fn test_duplicate_source_resets_email_and_keeps_names() {
        let contact = Contact {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: Some("jane@example.com".to_string()),
            phone: Some("555-0100".to_string()),
            avatar_path: Some("avatars/jane.png".to_string()),
            created_by: Uuid::new_v4(),
            updated_by: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let source = duplicate_source(&contact);
        assert_eq!(source.first_name, "Jane");
        assert_eq!(source.last_name, "Doe");
        assert_eq!(source.phone.as_deref(), Some("555-0100"));
        assert_eq!(source.email, None);
    }
}
