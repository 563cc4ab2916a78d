use crate::shared::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

/// Assembles the full route table from the per-module routers.
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(crate::directory::configure())
        .merge(crate::contacts::configure())
}

/// Liveness probe. Requires no session and no tenant.
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}
