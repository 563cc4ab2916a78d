use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

#[derive(Debug, Clone)]
pub enum DirectoryError {
    DatabaseConnection,
    NotFound,
    Denied,
    Validation { field: String, message: String },
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
}

impl DirectoryError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DatabaseConnection => write!(f, "Database connection failed"),
            Self::NotFound => write!(f, "Not found"),
            Self::Denied => write!(f, "Access denied"),
            Self::Validation { field, message } => write!(f, "Invalid {field}: {message}"),
            Self::CreateFailed => write!(f, "Failed to create record"),
            Self::UpdateFailed => write!(f, "Failed to update record"),
            Self::DeleteFailed => write!(f, "Failed to delete record"),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl IntoResponse for DirectoryError {
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
            Self::DatabaseConnection | Self::CreateFailed | Self::UpdateFailed
            | Self::DeleteFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Server error."})),
            )
                .into_response(),
        }
    }
}
