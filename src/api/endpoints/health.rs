//! Health and readiness endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;
use crate::config::APP_VERSION;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// False means uploads will fail immediately with a reasoning error.
    pub reasoning_available: bool,
}

/// `GET /api/health`
pub async fn health(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: APP_VERSION,
        reasoning_available: ctx.engines.reasoning.is_available(),
    })
}
