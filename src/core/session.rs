use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-session state. The current organization id is a write-through cache of
/// the last successful tenant resolution, never the source of truth: it is
/// re-validated against the user's memberships on every request.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SessionData {
    pub id: Uuid,
    pub user_id: Uuid,
    pub current_org_id: Option<Uuid>,
    pub flash: Option<FlashMessage>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct FlashMessage {
    pub kind: FlashKind,
    pub message: String,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlashKind {
    Success,
    Error,
}

/// In-process session store keyed by an opaque session id carried in a
/// cookie. Sessions are not persisted across restarts.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionData>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, user_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let data = SessionData {
            id,
            user_id,
            current_org_id: None,
            flash: None,
        };
        self.sessions.write().await.insert(id, data);
        trace!("session {id} created for user {user_id}");
        id
    }

    pub async fn get(&self, session_id: Uuid) -> Option<SessionData> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn destroy(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
        trace!("session {session_id} destroyed");
    }

    pub async fn current_org(&self, session_id: Uuid) -> Option<Uuid> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .and_then(|s| s.current_org_id)
    }

    pub async fn set_current_org(&self, session_id: Uuid, org_id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.current_org_id = Some(org_id);
        }
    }

    pub async fn clear_current_org(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.current_org_id = None;
        }
    }

    pub async fn set_flash(&self, session_id: Uuid, kind: FlashKind, message: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.flash = Some(FlashMessage {
                kind,
                message: message.to_string(),
            });
        }
    }

    /// Returns and clears the pending flash message, if any.
    pub async fn take_flash(&self, session_id: Uuid) -> Option<FlashMessage> {
        self.sessions
            .write()
            .await
            .get_mut(&session_id)
            .and_then(|s| s.flash.take())
    }
}
