use super::error::ContactsError;
use super::types::{ContactNote, NoteRequest};
use crate::core::policy::{self, NoteAction};
use crate::core::tenancy::TenantContext;
use crate::shared::utils::DbPool;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz, Uuid as DieselUuid};
use log::error;
use uuid::Uuid;

#[derive(QueryableByName)]
struct NoteRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    organization_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    contact_id: Uuid,
    #[diesel(sql_type = DieselUuid)]
    user_id: Uuid,
    #[diesel(sql_type = Text)]
    body: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

const NOTE_COLUMNS: &str =
    "id, organization_id, contact_id, user_id, body, created_at, updated_at";

pub struct NotesService {
    pool: DbPool,
}

impl NotesService {
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

    /// Notes on a contact, newest first. Admins see every note, members only
    /// their own.
    pub fn list_notes(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
    ) -> Result<Vec<ContactNote>, ContactsError> {
        self.ensure_contact(ctx, contact_id)?;

        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM contact_notes \
             WHERE contact_id = $1 AND organization_id = $2 \
             ORDER BY created_at DESC"
        );
        let rows: Vec<NoteRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(contact_id)
            .bind::<DieselUuid, _>(ctx.org_id())
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to list notes: {e}");
                ContactsError::DatabaseConnection
            })?;

        Ok(rows
            .into_iter()
            .map(note_from_row)
            .filter(|note| {
                policy::allows_note(
                    ctx,
                    NoteAction::View,
                    Some((note.organization_id, note.user_id)),
                )
            })
            .collect())
    }

    pub fn create_note(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        request: NoteRequest,
    ) -> Result<ContactNote, ContactsError> {
        self.ensure_contact(ctx, contact_id)?;
        if !policy::allows_note(ctx, NoteAction::Create, None) {
            return Err(ContactsError::Denied);
        }
        let body = validated_body(&request.body)?;

        let id = Uuid::new_v4();
        let mut conn = self.conn()?;
        diesel::sql_query(
            r#"
            INSERT INTO contact_notes (
                id, organization_id, contact_id, user_id, body, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            "#,
        )
        .bind::<DieselUuid, _>(id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.user_id)
        .bind::<Text, _>(&body)
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to create note: {e}");
            ContactsError::CreateFailed
        })?;
        drop(conn);

        self.get_note(ctx, contact_id, id)
    }

    pub fn update_note(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        note_id: Uuid,
        request: NoteRequest,
    ) -> Result<ContactNote, ContactsError> {
        let note = self.get_note(ctx, contact_id, note_id)?;
        if !policy::allows_note(
            ctx,
            NoteAction::Update,
            Some((note.organization_id, note.user_id)),
        ) {
            return Err(ContactsError::Denied);
        }
        let body = validated_body(&request.body)?;

        let mut conn = self.conn()?;
        diesel::sql_query(
            r#"
            UPDATE contact_notes SET body = $1, updated_at = NOW()
            WHERE id = $2 AND contact_id = $3 AND organization_id = $4
            "#,
        )
        .bind::<Text, _>(&body)
        .bind::<DieselUuid, _>(note_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to update note: {e}");
            ContactsError::UpdateFailed
        })?;
        drop(conn);

        self.get_note(ctx, contact_id, note_id)
    }

    pub fn delete_note(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        note_id: Uuid,
    ) -> Result<(), ContactsError> {
        let note = self.get_note(ctx, contact_id, note_id)?;
        if !policy::allows_note(
            ctx,
            NoteAction::Delete,
            Some((note.organization_id, note.user_id)),
        ) {
            return Err(ContactsError::Denied);
        }

        let mut conn = self.conn()?;
        diesel::sql_query(
            "DELETE FROM contact_notes WHERE id = $1 AND contact_id = $2 AND organization_id = $3",
        )
        .bind::<DieselUuid, _>(note_id)
        .bind::<DieselUuid, _>(contact_id)
        .bind::<DieselUuid, _>(ctx.org_id())
        .execute(&mut conn)
        .map_err(|e| {
            error!("Failed to delete note: {e}");
            ContactsError::DeleteFailed
        })?;
        Ok(())
    }

    fn get_note(
        &self,
        ctx: &TenantContext,
        contact_id: Uuid,
        note_id: Uuid,
    ) -> Result<ContactNote, ContactsError> {
        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM contact_notes \
             WHERE id = $1 AND contact_id = $2 AND organization_id = $3"
        );
        let rows: Vec<NoteRow> = diesel::sql_query(sql)
            .bind::<DieselUuid, _>(note_id)
            .bind::<DieselUuid, _>(contact_id)
            .bind::<DieselUuid, _>(ctx.org_id())
            .load(&mut conn)
            .map_err(|e| {
                error!("Failed to get note: {e}");
                ContactsError::DatabaseConnection
            })?;
        rows.into_iter()
            .next()
            .map(note_from_row)
            .ok_or(ContactsError::NotFound)
    }

    /// Scoped existence check for the parent contact; outside the current
    /// organization the contact, and thus all of its notes, is not found.
    fn ensure_contact(&self, ctx: &TenantContext, contact_id: Uuid) -> Result<(), ContactsError> {
        let mut conn = self.conn()?;
        #[derive(QueryableByName)]
        struct Exists {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            count: i64,
        }
        let rows: Vec<Exists> = diesel::sql_query(
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

fn note_from_row(row: NoteRow) -> ContactNote {
    ContactNote {
        id: row.id,
        organization_id: row.organization_id,
        contact_id: row.contact_id,
        user_id: row.user_id,
        body: row.body,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn validated_body(body: &str) -> Result<String, ContactsError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ContactsError::validation("body", "This field is required."));
    }
    if trimmed.len() > 10_000 {
        return Err(ContactsError::validation(
            "body",
            "Must not exceed 10000 characters.",
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_body_rejects_blank() {
        assert!(validated_body("   ").is_err());
        assert_eq!(validated_body(" hi ").unwrap(), "hi");
    }
}
