use super::error::ContactsError;
use super::meta::MetaService;
use super::notes::NotesService;
use super::service::ContactsService;
use super::types::*;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::middleware::TenantSession;
use crate::core::session::FlashKind;
use crate::shared::state::AppState;
use crate::shared::utils::wants_json;

const AVATAR_MAX_BYTES: usize = 2 * 1024 * 1024;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route(
            "/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
        .route("/contacts/:id/duplicate", post(duplicate_contact))
        .route(
            "/contacts/:id/avatar",
            post(upload_avatar).delete(delete_avatar),
        )
        .route("/contacts/:id/notes", get(list_notes).post(create_note))
        .route(
            "/contacts/:id/notes/:note_id",
            axum::routing::put(update_note).delete(delete_note),
        )
        .route("/contacts/:id/meta", get(list_meta).post(create_meta))
        .route(
            "/contacts/:id/meta/:meta_id",
            axum::routing::put(update_meta).delete(delete_meta),
        )
        .route("/debug/contacts", get(debug_contacts))
}

async fn list_contacts(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Query(query): Query<ContactListQuery>,
) -> Result<Json<ContactListResponse>, ContactsError> {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let response = service.list_contacts(&tenant.ctx, query)?;
    Ok(Json(response))
}

async fn create_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    headers: HeaderMap,
    Json(request): Json<CreateContactRequest>,
) -> Response {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    match service.create_contact(&tenant.ctx, request) {
        Ok(contact) => {
            if wants_json(&headers) {
                (StatusCode::CREATED, Json(contact)).into_response()
            } else {
                state
                    .sessions
                    .set_flash(
                        tenant.session_id,
                        FlashKind::Success,
                        "Contact created successfully.",
                    )
                    .await;
                Redirect::to(&format!("/contacts/{}", contact.id)).into_response()
            }
        }
        Err(ContactsError::DuplicateEmail {
            existing_contact_id,
        }) if !wants_json(&headers) => {
            state
                .sessions
                .set_flash(
                    tenant.session_id,
                    FlashKind::Error,
                    "Duplicate detected. No new contact was created.",
                )
                .await;
            Redirect::to(&format!("/contacts/{existing_contact_id}")).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn get_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
) -> Result<Json<Contact>, ContactsError> {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let contact = service.get_contact(&tenant.ctx, contact_id)?;
    Ok(Json(contact))
}

async fn update_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
    Json(request): Json<UpdateContactRequest>,
) -> Result<Json<Contact>, ContactsError> {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let contact = service.update_contact(&tenant.ctx, contact_id, request)?;
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ContactsError> {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let deleted = service.delete_contact(&tenant.ctx, contact_id)?;

    if let Some(path) = deleted.avatar_path {
        // The row is already gone; a stranded blob is cleaned up later.
        if let Err(e) = state.blobs.delete(&path).await {
            log::warn!("failed to delete avatar blob {path}: {e}");
        }
    }

    Ok(Json(json!({"message": "Contact deleted successfully."})))
}

async fn duplicate_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    match service.duplicate_contact(&tenant.ctx, contact_id) {
        Ok(copy) => {
            if wants_json(&headers) {
                (StatusCode::CREATED, Json(copy)).into_response()
            } else {
                state
                    .sessions
                    .set_flash(
                        tenant.session_id,
                        FlashKind::Success,
                        "Contact duplicated successfully.",
                    )
                    .await;
                Redirect::to(&format!("/contacts/{}", copy.id)).into_response()
            }
        }
        Err(e) => e.into_response(),
    }
}

/// Avatar replacement: the new blob is stored before the row is updated, and
/// the old blob is released only after the update sticks.
async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<AvatarResponse>, Response> {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let existing = service
        .get_contact(&tenant.ctx, contact_id)
        .map_err(IntoResponse::into_response)?;

    let mut upload: Option<(String, bytes::Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ContactsError::validation("avatar", &e.to_string()).into_response())?
    {
        if field.name() != Some("avatar") {
            continue;
        }
        let is_image = field
            .content_type()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            return Err(
                ContactsError::validation("avatar", "Avatar must be an image file.")
                    .into_response(),
            );
        }
        let filename = field.file_name().unwrap_or("avatar.png").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ContactsError::validation("avatar", &e.to_string()).into_response())?;
        if data.len() > AVATAR_MAX_BYTES {
            return Err(ContactsError::validation(
                "avatar",
                "Avatar file size must not exceed 2MB.",
            )
            .into_response());
        }
        upload = Some((filename, data));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| ContactsError::validation("avatar", "No file provided.").into_response())?;

    let path = state
        .blobs
        .store(data, "avatars", &filename)
        .await
        .map_err(IntoResponse::into_response)?;

    service
        .set_avatar(&tenant.ctx, contact_id, Some(&path))
        .map_err(IntoResponse::into_response)?;

    if let Some(old) = existing.avatar_path {
        if let Err(e) = state.blobs.delete(&old).await {
            log::warn!("failed to delete replaced avatar blob {old}: {e}");
        }
    }

    Ok(Json(AvatarResponse {
        avatar_url: state.blobs.url(&path),
        avatar_path: path,
    }))
}

async fn delete_avatar(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
) -> Result<Json<Contact>, ContactsError> {
    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let existing = service.get_contact(&tenant.ctx, contact_id)?;
    let contact = service.set_avatar(&tenant.ctx, contact_id, None)?;

    if let Some(old) = existing.avatar_path {
        if let Err(e) = state.blobs.delete(&old).await {
            log::warn!("failed to delete avatar blob {old}: {e}");
        }
    }
    Ok(Json(contact))
}

async fn list_notes(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
) -> Result<Json<Vec<ContactNote>>, ContactsError> {
    let service = NotesService::new(state.pool.clone());
    Ok(Json(service.list_notes(&tenant.ctx, contact_id)?))
}

async fn create_note(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
    Json(request): Json<NoteRequest>,
) -> Result<(StatusCode, Json<ContactNote>), ContactsError> {
    let service = NotesService::new(state.pool.clone());
    let note = service.create_note(&tenant.ctx, contact_id, request)?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn update_note(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path((contact_id, note_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<NoteRequest>,
) -> Result<Json<ContactNote>, ContactsError> {
    let service = NotesService::new(state.pool.clone());
    Ok(Json(service.update_note(
        &tenant.ctx,
        contact_id,
        note_id,
        request,
    )?))
}

async fn delete_note(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path((contact_id, note_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ContactsError> {
    let service = NotesService::new(state.pool.clone());
    service.delete_note(&tenant.ctx, contact_id, note_id)?;
    Ok(Json(json!({"message": "Note deleted successfully."})))
}

async fn list_meta(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
) -> Result<Json<Vec<ContactMeta>>, ContactsError> {
    let service = MetaService::new(state.pool.clone());
    Ok(Json(service.list_meta(&tenant.ctx, contact_id)?))
}

async fn create_meta(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path(contact_id): Path<Uuid>,
    Json(request): Json<CreateMetaRequest>,
) -> Result<(StatusCode, Json<ContactMeta>), ContactsError> {
    let service = MetaService::new(state.pool.clone());
    let meta = service.create_meta(&tenant.ctx, contact_id, request)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

async fn update_meta(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path((contact_id, meta_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateMetaRequest>,
) -> Result<Json<ContactMeta>, ContactsError> {
    let service = MetaService::new(state.pool.clone());
    Ok(Json(service.update_meta(
        &tenant.ctx,
        contact_id,
        meta_id,
        &request.value,
    )?))
}

async fn delete_meta(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
    Path((contact_id, meta_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ContactsError> {
    let service = MetaService::new(state.pool.clone());
    service.delete_meta(&tenant.ctx, contact_id, meta_id)?;
    Ok(Json(json!({"message": "Custom field removed successfully."})))
}

/// Admin-only view across organizations, the one deliberately unscoped read
/// path. Kept for operators diagnosing tenant-isolation reports.
async fn debug_contacts(
    State(state): State<Arc<AppState>>,
    tenant: TenantSession,
) -> Result<Json<serde_json::Value>, ContactsError> {
    if !tenant.ctx.is_admin() {
        return Err(ContactsError::Denied);
    }

    let service = ContactsService::new(state.pool.clone(), state.audit.clone());
    let all = service.list_contacts_unscoped(100)?;
    let in_current_org = all
        .iter()
        .filter(|c| c.organization_id == tenant.ctx.org_id())
        .count();
    let summary: Vec<_> = all
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.full_name(),
                "organization_id": c.organization_id,
            })
        })
        .collect();

    Ok(Json(json!({
        "current_org_id": tenant.ctx.org_id(),
        "total_contacts": all.len(),
        "contacts_in_current_org": in_current_org,
        "contacts": summary,
    })))
}
