//! REST API handlers for the synscope server

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tokio::sync::oneshot;

use synscope_core::{GraphError, IndexStats, SegmentId};

use crate::controller::{Command, ControllerEvent, Reply, SegmentSummary};
use crate::ServerState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub graph: IndexStats,
}

/// Error returned by the API, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "controller is not running".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::SynapseNotFound(_) | GraphError::SegmentNotFound(_) => ApiError::NotFound(err.to_string()),
            e if e.is_fatal() => ApiError::Internal(e.to_string()),
            e => ApiError::BadRequest(e.to_string()),
        }
    }
}

/// Send an event carrying a reply channel and wait for the answer.
async fn ask<T>(
    state: &ServerState,
    event: impl FnOnce(oneshot::Sender<T>) -> ControllerEvent,
) -> Result<T, ApiError> {
    let (tx, rx) = oneshot::channel();
    state.events.send(event(tx)).await.map_err(|_| ApiError::Unavailable)?;
    rx.await.map_err(|_| ApiError::Unavailable)
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<ServerState>>) -> Result<Json<HealthResponse>, ApiError> {
    let graph = ask(&state, |reply| ControllerEvent::Stats { reply }).await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        graph,
    }))
}

/// Summary of one segment
pub async fn get_segment(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<Json<SegmentSummary>, ApiError> {
    let summary = ask(&state, |reply| ControllerEvent::Segment {
        id: SegmentId(id),
        reply,
    })
    .await??;
    Ok(Json(summary))
}

/// Run a controller command
pub async fn post_command(
    State(state): State<Arc<ServerState>>,
    Json(command): Json<Command>,
) -> Result<Json<Reply>, ApiError> {
    tracing::debug!("API command: {:?}", command);
    let reply = ask(&state, |reply| ControllerEvent::Command { command, reply }).await??;
    Ok(Json(reply))
}

/// Latest viewer state
pub async fn get_state(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.session.current().await {
        Some(current) => Json(current).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
