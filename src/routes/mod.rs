pub mod gemini_routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::GenerationClient;
use self::gemini_routes::{config_handler, gemini_handler, health_handler};

/// HTTP surface of `genlux serve`: the generation proxy, its config check and `/health`.
pub fn router(generator: Arc<dyn GenerationClient>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/gemini", post(gemini_handler))
        .route("/api/gemini/config", get(config_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(generator)
}
