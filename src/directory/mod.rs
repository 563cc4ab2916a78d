mod error;
mod handlers;
mod migration;
mod service;
mod types;

pub use error::DirectoryError;
pub use handlers::configure;
pub use migration::create_directory_tables_migration;
pub use service::{slugify, DirectoryService, MembershipDirectory};
pub use types::*;
