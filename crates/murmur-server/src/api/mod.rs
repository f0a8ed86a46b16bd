//! API routes and handlers

mod generate;
mod health;
mod logs;
mod models;
mod speakers;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Model lifecycle
        .route("/models", get(models::list_models))
        .route("/models/load", post(models::load_model))
        .route("/models/unload", post(models::unload_model))
        // Synthesis
        .route("/generate/clone", post(generate::generate_clone))
        .route("/generate/control", post(generate::generate_control))
        .route("/generate/design", post(generate::generate_design))
        // Event log
        .route("/logs", get(logs::snapshot))
        .route("/logs/clear", post(logs::clear))
        .route("/logs/stream", get(logs::stream))
        // Speaker profiles
        .route("/speakers", get(speakers::list_speakers))
        .route("/speakers", post(speakers::create_speaker))
        .route("/speakers/:name", put(speakers::update_speaker))
        .route("/speakers/:name", delete(speakers::delete_speaker))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
