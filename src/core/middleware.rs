use crate::core::tenancy::{TenancyError, TenantContext, TenantResolver};
use crate::directory::{DirectoryService, User};
use crate::shared::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "contactserver_session";

#[derive(Debug, Clone)]
pub enum AuthError {
    Unauthenticated,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Authentication required"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Authentication required."})),
        )
            .into_response()
    }
}

/// The authenticated caller, resolved from the session cookie. Authentication
/// itself (password verification etc.) is delegated to the login endpoint;
/// this extractor only maps an existing session back to its user.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub user: User,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for SessionIdentity {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthError::Unauthenticated.into_response())?;

        let session_id = cookies
            .get(SESSION_COOKIE)
            .and_then(|c| Uuid::parse_str(c.value()).ok())
            .ok_or_else(|| AuthError::Unauthenticated.into_response())?;

        let session = state
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| AuthError::Unauthenticated.into_response())?;

        let directory = DirectoryService::new(state.pool.clone());
        let user = directory
            .user_by_id(session.user_id)
            .map_err(|e| e.into_response())?
            .ok_or_else(|| AuthError::Unauthenticated.into_response())?;

        Ok(Self { session_id, user })
    }
}

/// Identity plus resolved tenant, for tenant-requiring routes. Rejects with
/// 403 when the user belongs to no organization. A `?org_id=` query parameter
/// requests adoption of that organization for this and subsequent requests.
#[derive(Debug, Clone)]
pub struct TenantSession {
    pub session_id: Uuid,
    pub user: User,
    pub ctx: TenantContext,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for TenantSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = SessionIdentity::from_request_parts(parts, state).await?;
        let requested_org = org_id_from_query(parts.uri.query());

        let directory = DirectoryService::new(state.pool.clone());
        let resolver = TenantResolver::new(&directory, &state.sessions);
        let ctx = resolver
            .resolve(identity.session_id, identity.user.id, requested_org)
            .await
            .map_err(|e| e.into_response())?
            .ok_or_else(|| TenancyError::NoOrganization.into_response())?;

        Ok(Self {
            session_id: identity.session_id,
            user: identity.user,
            ctx,
        })
    }
}

pub fn set_session_cookie(cookies: &Cookies, session_id: Uuid) {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookies.add(cookie);
}

pub fn clear_session_cookie(cookies: &Cookies) {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookies.remove(cookie);
}

fn org_id_from_query(query: Option<&str>) -> Option<Uuid> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "org_id")
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}
