pub mod routes;

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::import::ImportOrchestrator;
use crate::middleware;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ImportOrchestrator,
}

/// Build the application router with all routes and middleware
pub fn create_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1", routes::import_routes())
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "FleetSync Server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness probe
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
