use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Filesystem root for stored blobs (avatars).
    pub root: String,
    /// Public URL prefix blobs are served under.
    pub public_base: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/contactserver".to_string());
        let storage_root = env::var("STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string());
        let storage_public_base =
            env::var("STORAGE_PUBLIC_BASE").unwrap_or_else(|_| "/storage".to_string());

        Self {
            server: ServerConfig { host, port },
            database_url,
            storage: StorageConfig {
                root: storage_root,
                public_base: storage_public_base,
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
