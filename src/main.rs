use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use event_manager_server::auth::JwtService;
use event_manager_server::config::Config;
use event_manager_server::routes::create_routes;
use event_manager_server::state::AppState;
use event_manager_server::store::{EventStore, InMemoryEventStore, PgEventStore};

const DEFAULT_LOG_FILTER: &str = "info,event_manager_server=debug,tower_http=debug";

async fn connect_store(config: &Config) -> Result<Arc<dyn EventStore>, Box<dyn std::error::Error>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store (data is lost on exit)");
        return Ok(Arc::new(InMemoryEventStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(database_url)
        .await?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Migrations run successfully");

    Ok(Arc::new(PgEventStore::new(pool)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env();
    let store = connect_store(&config).await?;
    let state = AppState::new(store, JwtService::new(&config.jwt_secret));

    let app: Router = create_routes(state, &config);

    let addr = config.bind_addr();
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
