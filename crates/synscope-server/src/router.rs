//! Axum router setup for the synscope server

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::{
    handlers::{get_segment, get_state, health_check, post_command},
    websocket::ws_handler,
    ServerState,
};

/// Create the axum router with all routes
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Viewer state channel
        .route("/ws", get(ws_handler))
        // REST API endpoints
        .route("/api/health", get(health_check))
        .route("/api/state", get(get_state))
        .route("/api/segments/:id", get(get_segment))
        .route("/api/command", post(post_command))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
