use crate::shared::utils::DbPool;
use diesel::connection::SimpleConnection;
use log::info;

/// Applies the per-module schema migrations. All statements are idempotent
/// (`IF NOT EXISTS`) so this runs unconditionally at startup.
pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;

    info!("Applying directory schema");
    conn.batch_execute(crate::directory::create_directory_tables_migration())?;

    info!("Applying contacts schema");
    conn.batch_execute(crate::contacts::create_contacts_tables_migration())?;

    Ok(())
}
