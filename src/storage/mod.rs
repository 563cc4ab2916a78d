use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use log::error;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum StorageError {
    WriteFailed(String),
    DeleteFailed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WriteFailed(msg) => write!(f, "Failed to store file: {msg}"),
            Self::DeleteFailed(msg) => write!(f, "Failed to delete file: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl IntoResponse for StorageError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Opaque blob store used for avatar attachments. Paths returned by `store`
/// are the only handle callers keep; `url` maps a path to its public URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(
        &self,
        data: Bytes,
        namespace: &str,
        filename: &str,
    ) -> Result<String, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    fn url(&self, path: &str) -> String;
}

/// Local-filesystem blob store. Files land under `<root>/<namespace>/` with a
/// random name that preserves the original extension.
pub struct DiskStore {
    root: PathBuf,
    public_base: String,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    async fn store(
        &self,
        data: Bytes,
        namespace: &str,
        filename: &str,
    ) -> Result<String, StorageError> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let relative = format!("{namespace}/{}.{ext}", Uuid::new_v4());

        let full = self.root.join(&relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create storage directory: {e}");
                StorageError::WriteFailed(e.to_string())
            })?;
        }

        tokio::fs::write(&full, &data).await.map_err(|e| {
            error!("Failed to write blob {relative}: {e}");
            StorageError::WriteFailed(e.to_string())
        })?;

        Ok(relative)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.root.join(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Failed to delete blob {path}: {e}");
                Err(StorageError::DeleteFailed(e.to_string()))
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.public_base.trim_end_matches('/'))
    }
}
