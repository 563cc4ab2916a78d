#[cfg(test)]
mod tenant_isolation_integration_tests {
    use contactserver::audit::AuditLogger;
    use contactserver::contacts::{
        ContactsError, ContactsService, CreateContactRequest, CreateMetaRequest, MetaService,
        META_LIMIT,
    };
    use contactserver::core::bootstrap::run_migrations;
    use contactserver::core::session::SessionStore;
    use contactserver::core::tenancy::{TenantContext, TenantResolver};
    use contactserver::directory::{CreateOrganizationRequest, DirectoryService};
    use contactserver::shared::utils::{create_conn, DbPool};
    use diesel::prelude::*;
    use diesel::sql_types::{Text, Uuid as DieselUuid};
    use uuid::Uuid;

    // Skips unless TEST_DATABASE_URL points at a reachable Postgres.
    fn test_pool() -> Option<DbPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = match create_conn(&url) {
            Ok(pool) => pool,
            Err(_) => {
                println!("Skipping test - cannot build pool");
                return None;
            }
        };
        if pool.get().is_err() {
            println!("Skipping test - Postgres not available");
            return None;
        }
        Some(pool)
    }

    fn seed_user(pool: &DbPool, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut conn = pool.get().unwrap();
        diesel::sql_query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3)")
            .bind::<DieselUuid, _>(id)
            .bind::<Text, _>(name)
            .bind::<Text, _>(format!("{id}@example.test"))
            .execute(&mut conn)
            .unwrap();
        id
    }

    async fn tenant_for(pool: &DbPool, user_id: Uuid, org_name: &str) -> TenantContext {
        let directory = DirectoryService::new(pool.clone());
        directory
            .create_organization(
                user_id,
                CreateOrganizationRequest {
                    name: format!("{org_name} {}", Uuid::new_v4()),
                    slug: None,
                },
            )
            .unwrap();

        let sessions = SessionStore::new();
        let sid = sessions.create(user_id).await;
        TenantResolver::new(&directory, &sessions)
            .resolve(sid, user_id, None)
            .await
            .unwrap()
            .unwrap()
    }

    fn contact_request(email: Option<&str>) -> CreateContactRequest {
        CreateContactRequest {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: email.map(str::to_string),
            phone: None,
        }
    }

    #[tokio::test]
    async fn test_dedup_blocks_within_org_but_not_across() {
        let Some(pool) = test_pool() else { return };
        run_migrations(&pool).unwrap();

        let user_a = seed_user(&pool, "Alice");
        let user_b = seed_user(&pool, "Bob");
        let ctx_a = tenant_for(&pool, user_a, "Alpha").await;
        let ctx_b = tenant_for(&pool, user_b, "Beta").await;

        let email = format!("shared-{}@example.test", Uuid::new_v4());
        let service = ContactsService::new(pool.clone(), AuditLogger::new());

        let first = service
            .create_contact(&ctx_a, contact_request(Some(&email)))
            .unwrap();

        // Second create with the same email (different case) is blocked and
        // names the surviving contact.
        let err = service
            .create_contact(&ctx_a, contact_request(Some(&email.to_uppercase())))
            .unwrap_err();
        match err {
            ContactsError::DuplicateEmail {
                existing_contact_id,
            } => assert_eq!(existing_contact_id, first.id),
            other => panic!("expected duplicate conflict, got {other}"),
        }

        // The same email is fine in another organization.
        let cross = service
            .create_contact(&ctx_b, contact_request(Some(&email)))
            .unwrap();
        assert_eq!(cross.organization_id, ctx_b.org_id());
    }

    #[tokio::test]
    async fn test_cross_tenant_lookup_is_not_found() {
        let Some(pool) = test_pool() else { return };
        run_migrations(&pool).unwrap();

        let user_a = seed_user(&pool, "Alice");
        let user_b = seed_user(&pool, "Bob");
        let ctx_a = tenant_for(&pool, user_a, "Alpha").await;
        let ctx_b = tenant_for(&pool, user_b, "Beta").await;

        let service = ContactsService::new(pool.clone(), AuditLogger::new());
        let contact = service.create_contact(&ctx_a, contact_request(None)).unwrap();

        // Existing id, wrong tenant: not found, never forbidden.
        let err = service.get_contact(&ctx_b, contact.id).unwrap_err();
        assert!(matches!(err, ContactsError::NotFound), "got {err}");

        let listed = service
            .list_contacts(&ctx_b, Default::default())
            .unwrap();
        assert!(listed.contacts.iter().all(|c| c.id != contact.id));
    }

    #[tokio::test]
    async fn test_duplicate_operation_resets_email() {
        let Some(pool) = test_pool() else { return };
        run_migrations(&pool).unwrap();

        let user = seed_user(&pool, "Alice");
        let ctx = tenant_for(&pool, user, "Alpha").await;
        let service = ContactsService::new(pool.clone(), AuditLogger::new());

        let email = format!("orig-{}@example.test", Uuid::new_v4());
        let original = service
            .create_contact(&ctx, contact_request(Some(&email)))
            .unwrap();

        let copy = service.duplicate_contact(&ctx, original.id).unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.first_name, original.first_name);
        assert_eq!(copy.email, None);
        assert_eq!(copy.organization_id, ctx.org_id());
        assert_eq!(copy.created_by, ctx.user_id);
    }

    #[tokio::test]
    async fn test_meta_cap_and_key_uniqueness() {
        let Some(pool) = test_pool() else { return };
        run_migrations(&pool).unwrap();

        let user = seed_user(&pool, "Alice");
        let ctx = tenant_for(&pool, user, "Alpha").await;
        let contacts = ContactsService::new(pool.clone(), AuditLogger::new());
        let metas = MetaService::new(pool.clone());

        let contact = contacts.create_contact(&ctx, contact_request(None)).unwrap();

        for i in 0..META_LIMIT {
            metas
                .create_meta(
                    &ctx,
                    contact.id,
                    CreateMetaRequest {
                        key: format!("field-{i}"),
                        value: "v".to_string(),
                    },
                )
                .unwrap();
        }

        // One over the cap is rejected.
        let err = metas
            .create_meta(
                &ctx,
                contact.id,
                CreateMetaRequest {
                    key: "one-too-many".to_string(),
                    value: "v".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ContactsError::MetaLimitReached), "got {err}");

        // A repeated key on another contact below the cap is a key conflict.
        let second = contacts.create_contact(&ctx, contact_request(None)).unwrap();
        metas
            .create_meta(
                &ctx,
                second.id,
                CreateMetaRequest {
                    key: "birthday".to_string(),
                    value: "v1".to_string(),
                },
            )
            .unwrap();
        let err = metas
            .create_meta(
                &ctx,
                second.id,
                CreateMetaRequest {
                    key: "birthday".to_string(),
                    value: "v2".to_string(),
                },
            )
            .unwrap_err();
        assert!(
            matches!(err, ContactsError::DuplicateMetaKey { ref key } if key == "birthday"),
            "got {err}"
        );
    }
}
