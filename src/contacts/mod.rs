mod error;
mod handlers;
mod meta;
mod migration;
mod notes;
mod service;
mod types;

pub use error::ContactsError;
pub use handlers::configure;
pub use meta::{MetaService, META_LIMIT};
pub use migration::create_contacts_tables_migration;
pub use notes::NotesService;
pub use service::{duplicate_source, normalize_email, ContactsService};
pub use types::*;
