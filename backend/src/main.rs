mod api;
mod config;
mod db;
mod errors;
mod models;
mod relayer;
mod retry;
mod state;
mod subgraph;

use crate::config::GatewayConfig;
use crate::errors::ApiError;
use crate::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env();

    // Registry and key cache live under DATA_DIR (ignored by git).
    std::fs::create_dir_all(&config.data_dir).map_err(|_| ApiError::Internal)?;

    let db = db::connect(&config.db_url()).await?;
    db::init_schema(&db).await?;

    let addr = config.socket_addr().map_err(ApiError::BadRequest)?;
    let state = AppState::new(db, config)?;

    match &state.groups {
        Some(groups) => tracing::info!(url = groups.url(), "group indexer configured"),
        None => tracing::warn!("SUBGRAPH_URL not set, group routes are disabled"),
    }
    if state.relayer.is_none() {
        tracing::warn!("RELAYER_WEBHOOK_URL not set, verified submissions are recorded only");
    }

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!(%addr, "credential gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}
