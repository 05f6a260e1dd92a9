use anyhow::{Context, Result};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use api::{AppConfig, AppState, Metrics, Services, build_router, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format);
    info!(config = ?config.redacted(), "ESG GraphRAG server starting");

    let services = Services::new(config.clone(), Metrics::new());
    // Connect up front so a bad endpoint shows at startup, not on the first request.
    services.stores().await?;

    let state = Arc::new(AppState::new(services));
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!("Server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
