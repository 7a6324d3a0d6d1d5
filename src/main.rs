use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use landmark_server::api;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    tracing::info!("Starting Landmark Server v{}", env!("CARGO_PKG_VERSION"));

    // Build router
    let app = Router::new()
        .route("/health", get(api::health::health_handler))
        .route("/index", post(api::index::index_handler))
        .route("/identify", post(api::identify::identify_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    // Bind to socket
    let addr = SocketAddr::from(([127, 0, 0, 1], 8767));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    // Run server
    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
