use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ContactsError {
    DatabaseConnection,
    /// Covers both genuinely missing rows and rows outside the current
    /// organization; the two are indistinguishable to the caller.
    NotFound,
    Denied,
    Validation {
        field: String,
        message: String,
    },
    DuplicateEmail {
        existing_contact_id: Uuid,
    },
    DuplicateMetaKey {
        key: String,
    },
    MetaLimitReached,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
}

impl ContactsError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for ContactsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DatabaseConnection => write!(f, "Database connection failed"),
            Self::NotFound => write!(f, "Contact not found"),
            Self::Denied => write!(f, "Access denied"),
            Self::Validation { field, message } => write!(f, "Invalid {field}: {message}"),
            Self::DuplicateEmail {
                existing_contact_id,
            } => write!(f, "Duplicate email, existing contact {existing_contact_id}"),
            Self::DuplicateMetaKey { key } => write!(f, "Duplicate custom field key '{key}'"),
            Self::MetaLimitReached => write!(f, "Custom field limit reached"),
            Self::CreateFailed => write!(f, "Failed to create record"),
            Self::UpdateFailed => write!(f, "Failed to update record"),
            Self::DeleteFailed => write!(f, "Failed to delete record"),
        }
    }
}

impl std::error::Error for ContactsError {}

impl IntoResponse for ContactsError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "Not found."}))).into_response()
            }
            Self::Denied => (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "Access denied."})),
            )
                .into_response(),
            Self::Validation { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"errors": {field: [message]}})),
            )
                .into_response(),
            Self::DuplicateEmail {
                existing_contact_id,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "code": "DUPLICATE_EMAIL",
                    "existing_contact_id": existing_contact_id,
                })),
            )
                .into_response(),
            Self::DuplicateMetaKey { key } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"code": "DUPLICATE_META_KEY", "key": key})),
            )
                .into_response(),
            Self::MetaLimitReached => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "code": "META_LIMIT_REACHED",
                    "limit": crate::contacts::META_LIMIT,
                })),
            )
                .into_response(),
            Self::DatabaseConnection
            | Self::CreateFailed
            | Self::UpdateFailed
            | Self::DeleteFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Server error."})),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn status_and_body(err: ContactsError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_duplicate_email_response_shape() {
        let id = Uuid::new_v4();
        let (status, body) = status_and_body(ContactsError::DuplicateEmail {
            existing_contact_id: id,
        })
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "DUPLICATE_EMAIL");
        assert_eq!(body["existing_contact_id"], json!(id));
    }

    #[tokio::test]
    async fn test_not_found_and_denied_statuses() {
        let (status, _) = status_and_body(ContactsError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = status_and_body(ContactsError::Denied).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Access denied.");
    }

    #[tokio::test]
    async fn test_meta_conflict_responses() {
        let (status, body) = status_and_body(ContactsError::DuplicateMetaKey {
            key: "birthday".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "DUPLICATE_META_KEY");
        assert_eq!(body["key"], "birthday");

        let (status, body) = status_and_body(ContactsError::MetaLimitReached).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "META_LIMIT_REACHED");
        assert_eq!(body["limit"], crate::contacts::META_LIMIT);
    }

    #[tokio::test]
    async fn test_validation_names_the_field() {
        let (status, body) =
            status_and_body(ContactsError::validation("first_name", "This field is required."))
                .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["first_name"][0], "This field is required.");
    }
}
