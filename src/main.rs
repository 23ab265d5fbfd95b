use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use threadly::auth::session;
use threadly::config::{Cli, Config};
use threadly::db;
use threadly::routes;
use threadly::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli)?;
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directories exist
    std::fs::create_dir_all(config.uploads_path().join("avatars"))?;
    std::fs::create_dir_all(config.uploads_path().join("covers"))?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    let purged = session::purge_expired(&*pool.get()?)?;
    if purged > 0 {
        tracing::info!(purged, "Removed expired sessions");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = routes::build_router(AppState::new(pool, config));

    // Start server
    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
