//! HTTP handlers for health and call inspection.

use crate::session::SessionSnapshot;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Response body for `GET /api/calls`.
#[derive(Debug, Serialize)]
pub struct CallsResponse {
    /// Number of registered calls.
    pub active: usize,
    /// One snapshot per call, ordered by call id.
    pub calls: Vec<SessionSnapshot>,
}

/// Health check handler.
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeCalls": state.registry.len().await
    }))
}

/// Handler for `GET /api/calls`.
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<CallsResponse> {
    let mut calls = Vec::new();
    for handle in state.registry.handles().await {
        // A session that ended between listing and asking is simply skipped.
        if let Some(snapshot) = handle.snapshot().await {
            calls.push(snapshot);
        }
    }
    calls.sort_by(|a, b| a.call_id.cmp(&b.call_id));
    Json(CallsResponse {
        active: calls.len(),
        calls,
    })
}

/// Handler for `GET /api/calls/{callId}`.
pub async fn get_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state
        .registry
        .get(&call_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no active call {}", call_id)))?;
    handle
        .snapshot()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("call {} has ended", call_id)))
}
