use contactserver::api_router::configure_api_routes;
use contactserver::core::bootstrap::run_migrations;
use contactserver::core::config::AppConfig;
use contactserver::core::session::SessionStore;
use contactserver::shared::state::AppState;
use contactserver::shared::utils::create_conn;
use contactserver::storage::DiskStore;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env();
    info!("Starting contactserver on {}", config.bind_addr());

    let pool = create_conn(&config.database_url)?;
    run_migrations(&pool)?;

    let blobs = Arc::new(DiskStore::new(
        &config.storage.root,
        &config.storage.public_base,
    ));
    let state = Arc::new(AppState::new(pool, SessionStore::new(), blobs));

    let app = configure_api_routes()
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
