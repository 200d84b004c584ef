// Member Registry - Web Server

use anyhow::{Context, Result};
use member_registry::{api, init_tracing, Config, Registry};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(db = %config.db_path.display(), prefix = %config.id_prefix, "Starting member registry server");

    let registry = Arc::new(Registry::open(&config)?);
    let app = api::router(registry);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "Server listening");

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
