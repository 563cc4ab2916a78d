pub fn create_contacts_tables_migration() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id UUID PRIMARY KEY,
        organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        avatar_path TEXT,
        created_by UUID NOT NULL REFERENCES users(id),
        updated_by UUID NOT NULL REFERENCES users(id),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        deleted_at TIMESTAMPTZ
    );

    -- Authoritative per-organization, case-insensitive email dedup guard.
    CREATE UNIQUE INDEX IF NOT EXISTS contacts_org_email_key
        ON contacts (organization_id, lower(email))
        WHERE email IS NOT NULL AND deleted_at IS NULL;

    CREATE INDEX IF NOT EXISTS idx_contacts_org_name
        ON contacts (organization_id, first_name, last_name);

    CREATE TABLE IF NOT EXISTS contact_notes (
        id UUID PRIMARY KEY,
        organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
        contact_id UUID NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
        user_id UUID NOT NULL REFERENCES users(id),
        body TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_contact_notes_contact ON contact_notes (contact_id, created_at);

    CREATE TABLE IF NOT EXISTS contact_metas (
        id UUID PRIMARY KEY,
        organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
        contact_id UUID NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
        key VARCHAR(100) NOT NULL,
        value TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT contact_metas_contact_key_key UNIQUE (contact_id, key)
    );

    CREATE INDEX IF NOT EXISTS idx_contact_metas_contact ON contact_metas (contact_id);
    "#
}
