use super::error::ContactsError;
use super::types::{ContactMeta, CreateMetaRequest};
use crate::core::policy::{self, MetaAction};
use crate::core::tenancy::TenantContext;
use crate::shared::utils::DbPool;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Text, Timestamptz, Uuid as DieselUuid};
use log::error;
use uuid::Uuid;

/// Hard cap on custom fields per contact.
pub const META_LIMIT: i64 = 5;

#[derive(QueryableByName)]
struct MetaRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    organization_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    contact_id: Uuid,
    #[diesel(sql_type = Text)]
    key: String,
    #[diesel(sql_type = Text)]
    value: String,
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

const META_COLUMNS: &str =
    "id, organization_id, contact_id, key, value, created_at, updated_at";

pub struct MetaService {
    pool: DbPool,
}

impl MetaService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
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

    pub fn list_meta(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
    ) -> Result<Vec<ContactMeta>, ContactsError> {
        self.ensure_contact(ctx, contact_id)?;
        if !policy::allows_meta(ctx, MetaAction::View, Some(ctx.org_id())) {
            return Err(ContactsError::Denied);
        }

        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {META_COLUMNS} FROM contact_metas \
             WHERE contact_id = $1 AND organization_id = $2 ORDER BY key"
        );
        let rows: Vec<MetaRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(contact_id)
            .bind::<DieselUuid, _>(ctx.org_id())
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to list custom fields: {e}");
                ContactsError::DatabaseConnection
            })?;
        Ok(rows.into_iter().map(meta_from_row).collect())
    }

    /// Rejected once the contact already carries [`META_LIMIT`] fields. The
    /// count pre-check gives the friendly error; the `(contact_id, key)`
    /// unique constraint backs the key uniqueness under concurrency.
    pub fn create_meta(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        request: CreateMetaRequest,
    ) -> Result<ContactMeta, ContactsError> {
        self.ensure_contact(ctx, contact_id)?;
        if !policy::allows_meta(ctx, MetaAction::Create, None) {
            return Err(ContactsError::Denied);
        }

        let key = validated_key(&request.key)?;
        let value = validated_value(&request.value)?;

        if self.meta_count(ctx, contact_id)? >= META_LIMIT {
            return Err(ContactsError::MetaLimitReached);
        }

        let id = Uuid::new_v4();
        let mut conn = self.conn()?;
        let inserted = diesel::sql_query(
            r#"
            INSERT INTO contact_metas (
                id, organization_id, contact_id, key, value, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            "#,
        )
        .bind::<DieselUuid, _>(id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .bind::<DieselUuid, _>(contact_id)
        .bind::<Text, _>(&key)
        .bind::<Text, _>(&value)
        .execute(&mut conn);

        match inserted {
            Ok(_) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some("contact_metas_contact_key_key") =>
            {
                return Err(ContactsError::DuplicateMetaKey { key });
            }
            Err(e) => {
                error!("Failed to create custom field: {e}");
                return Err(ContactsError::CreateFailed);
            }
        }
        drop(conn);

        self.get_meta(ctx, contact_id, id)
    }

    /// Replaces a field's value. The key is fixed at creation; renames are a
    /// delete plus a create so the cap and key uniqueness stay simple.
    pub fn update_meta(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        meta_id: Uuid,
        value: &str,
    ) -> Result<ContactMeta, ContactsError> {
        let meta = self.get_meta(ctx, contact_id, meta_id)?;
        if !policy::allows_meta(ctx, MetaAction::Update, Some(meta.organization_id)) {
            return Err(ContactsError::Denied);
        }
        let value = validated_value(value)?;

        let mut conn = self.conn()?;
        diesel::sql_query(
            r#"
            UPDATE contact_metas SET value = $1, updated_at = NOW()
            WHERE id = $2 AND contact_id = $3 AND organization_id = $4
            "#,
        )
        .bind::<Text, _>(&value)
        .bind::<DieselUuid, _>(meta_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to update custom field: {e}");
            ContactsError::UpdateFailed
        })?;
        drop(conn);

        self.get_meta(ctx, contact_id, meta_id)
    }

    pub fn delete_meta(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        meta_id: Uuid,
    ) -> Result<(), ContactsError> {
        let meta = self.get_meta(ctx, contact_id, meta_id)?;
        if !policy::allows_meta(ctx, MetaAction::Delete, Some(meta.organization_id)) {
            return Err(ContactsError::Denied);
        }

        let mut conn = self.conn()?;
        diesel::sql_query(
            "DELETE FROM contact_metas WHERE id = $1 AND contact_id = $2 AND organization_id = $3",
        )
        .bind::<DieselUuid, _>(meta_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to delete custom field: {e}");
            ContactsError::DeleteFailed
        })?;
        Ok(())
    }

    fn get_meta(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        meta_id: Uuid,
    ) -> Result<ContactMeta, ContactsError> {
        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {META_COLUMNS} FROM contact_metas \
             WHERE id = $1 AND contact_id = $2 AND organization_id = $3"
        );
        let rows: Vec<MetaRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(meta_id)
            .bind::<DieselUuid, _>(contact_id)
            .bind::<DieselUuid, _>(ctx.org_id())
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to get custom field: {e}");
                ContactsError::DatabaseConnection
            })?;
        rows.into_iter()
            .next()
            .map(meta_from_row)
            .ok_or(ContactsError::NotFound)
    }

    fn meta_count(&self, ctx: &TenantContext, contact_id: Uuid) -> Result<i64, ContactsError> {
        let mut conn = self.conn()?;
        let rows: Vec<CountRow> = diesel::sql_query(
            "SELECT COUNT(*) as count FROM contact_metas \
             WHERE contact_id = $1 AND organization_id = $2",
        )
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .load(&mut conn)
        .map_err(|e| {
            error!("Failed to count custom fields: {e}");
            ContactsError::DatabaseConnection
        })?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    fn ensure_contact(&self, ctx: &TenantContext, contact_id: Uuid) -> Result<(), ContactsError> {
        let mut conn = self.conn()?;
        let rows: Vec<CountRow> = diesel::sql_query(
            "SELECT COUNT(*) as count FROM contacts \
             WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL",
        )
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .load(&mut conn)
        .map_err(|e| {
            error!("Failed to check contact: {e}");
            ContactsError::DatabaseConnection
        })?;
        if rows.first().map(|r| r.count).unwrap_or(0) == 0 {
            return Err(ContactsError::NotFound);
        }
        Ok(())
    }
}

fn meta_from_row(row: MetaRow) -> ContactMeta {
    ContactMeta {
        id: row.id,
        organization_id: row.organization_id,
        contact_id: row.contact_id,
        key: row.key,
        value: row.value,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn validated_key(key: &str) -> Result<String, ContactsError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(ContactsError::validation("key", "This field is required."));
    }
    if trimmed.len() > 100 {
        return Err(ContactsError::validation(
            "key",
            "Must not exceed 100 characters.",
        ));
    }
    Ok(trimmed.to_string())
}

fn validated_value(value: &str) -> Result<String, ContactsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ContactsError::validation(
            "value",
            "This field is required.",
        ));
    }
    Ok(trimmed.to_string())
}
