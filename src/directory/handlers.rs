use super::error::DirectoryError;
use super::service::{DirectoryService, MembershipDirectory};
use super::types::*;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::middleware::{clear_session_cookie, set_session_cookie, SessionIdentity};
use crate::core::policy::{self, OrgAction};
use crate::core::session::FlashKind;
use crate::core::tenancy::TenantResolver;
use crate::shared::state::AppState;
use crate::shared::utils::wants_json;
use tower_cookies::Cookies;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route(
            "/organizations",
            get(list_organizations).post(create_organization),
        )
        .route(
            "/organizations/:id",
            put(update_organization).delete(delete_organization),
        )
        .route("/organizations/switch", post(switch_organization))
        .route("/notices", get(take_notice))
}

/// Returns and clears the pending flash notice for browser-style clients.
async fn take_notice(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
) -> Json<serde_json::Value> {
    let flash = state.sessions.take_flash(identity.session_id).await;
    Json(json!({"flash": flash}))
}

/// Issues a session for an already-verified identity. Credential checks live
/// with the identity provider; here an unknown email is simply rejected.
async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Response> {
    let directory = DirectoryService::new(state.pool.clone());
    let user = directory
        .user_by_email(request.email.trim())
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| {
            DirectoryError::validation("email", "No account found for this email.").into_response()
        })?;

    let session_id = state.sessions.create(user.id).await;

    let resolver = TenantResolver::new(&directory, &state.sessions);
    let ctx = resolver
        .resolve(session_id, user.id, None)
        .await
        .map_err(IntoResponse::into_response)?;

    set_session_cookie(&cookies, session_id);
    log::info!("user {} logged in", user.id);

    Ok(Json(LoginResponse {
        current_organization_id: ctx.map(|c| c.org_id()),
        user,
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    identity: SessionIdentity,
) -> Json<serde_json::Value> {
    state.sessions.destroy(identity.session_id).await;
    clear_session_cookie(&cookies);
    Json(json!({"message": "Logged out."}))
}

async fn list_organizations(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
) -> Result<Json<OrganizationListResponse>, DirectoryError> {
    let directory = DirectoryService::new(state.pool.clone());
    let organizations = directory.organizations_for_user(identity.user.id)?;
    let current_organization_id = state.sessions.current_org(identity.session_id).await;
    Ok(Json(OrganizationListResponse {
        organizations,
        current_organization_id,
    }))
}

/// Any authenticated user may create an organization; the creator becomes its
/// owner and an Admin member, and the session adopts it as current.
async fn create_organization(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    headers: HeaderMap,
    Json(request): Json<CreateOrganizationRequest>,
) -> Response {
    if !policy::allows_organization_create() {
        return DirectoryError::Denied.into_response();
    }

    let directory = DirectoryService::new(state.pool.clone());
    match directory.create_organization(identity.user.id, request) {
        Ok(org) => {
            state
                .sessions
                .set_current_org(identity.session_id, org.id)
                .await;
            if wants_json(&headers) {
                (StatusCode::CREATED, Json(org)).into_response()
            } else {
                state
                    .sessions
                    .set_flash(
                        identity.session_id,
                        FlashKind::Success,
                        "Organization created successfully.",
                    )
                    .await;
                Redirect::to("/organizations").into_response()
            }
        }
        Err(e) => e.into_response(),
    }
}

async fn update_organization(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    Path(org_id): Path<Uuid>,
    Json(request): Json<UpdateOrganizationRequest>,
) -> Result<Json<Organization>, DirectoryError> {
    let directory = DirectoryService::new(state.pool.clone());
    let org = directory.organization(org_id)?.ok_or(DirectoryError::NotFound)?;
    let role = directory
        .find_membership(identity.user.id, org_id)?
        .map(|m| m.role);

    if !policy::allows_organization(identity.user.id, role, &org, OrgAction::Update) {
        return Err(DirectoryError::Denied);
    }

    Ok(Json(directory.update_organization(org_id, request)?))
}

async fn delete_organization(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    Path(org_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, DirectoryError> {
    let directory = DirectoryService::new(state.pool.clone());
    let org = directory.organization(org_id)?.ok_or(DirectoryError::NotFound)?;
    let role = directory
        .find_membership(identity.user.id, org_id)?
        .map(|m| m.role);

    if !policy::allows_organization(identity.user.id, role, &org, OrgAction::Delete) {
        return Err(DirectoryError::Denied);
    }

    directory.delete_organization(org_id)?;
    if state.sessions.current_org(identity.session_id).await == Some(org_id) {
        state.sessions.clear_current_org(identity.session_id).await;
    }
    Ok(Json(json!({"message": "Organization deleted successfully."})))
}

/// Changes the session's current organization. Denied switches leave the
/// session exactly as it was.
async fn switch_organization(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    headers: HeaderMap,
    Json(request): Json<SwitchOrganizationRequest>,
) -> Response {
    let directory = DirectoryService::new(state.pool.clone());
    let resolver = TenantResolver::new(&directory, &state.sessions);

    let switched = match resolver
        .switch(identity.session_id, identity.user.id, request.organization_id)
        .await
    {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    if switched {
        if wants_json(&headers) {
            Json(json!({
                "success": true,
                "organization_id": request.organization_id,
            }))
            .into_response()
        } else {
            state
                .sessions
                .set_flash(
                    identity.session_id,
                    FlashKind::Success,
                    "Organization switched.",
                )
                .await;
            Redirect::to("/contacts").into_response()
        }
    } else if wants_json(&headers) {
        (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Access denied to organization."})),
        )
            .into_response()
    } else {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "errors": {"organization_id": ["You do not have access to this organization."]}
            })),
        )
            .into_response()
    }
}
