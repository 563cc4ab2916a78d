use crate::audit::AuditLogger;
use crate::core::session::SessionStore;
use crate::shared::utils::DbPool;
use crate::storage::BlobStore;
use std::sync::Arc;

/// Shared application state handed to every handler.
///
/// Holds only process-wide collaborators; per-request tenant state lives in
/// the `TenantContext` resolved by the extractors in `core::middleware`.
/// Configuration is consumed at startup and does not travel with requests.
pub struct AppState {
    pub pool: DbPool,
    pub sessions: SessionStore,
    pub blobs: Arc<dyn BlobStore>,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(pool: DbPool, sessions: SessionStore, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            pool,
            sessions,
            blobs,
            audit: AuditLogger::new(),
        }
    }
}
