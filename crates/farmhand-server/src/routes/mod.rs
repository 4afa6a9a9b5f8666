//! HTTP route handlers.

pub mod analyze;
pub mod history;

use crate::state::AppState;
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use farmhand_core::FarmhandError;
use farmhand_types::Language;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Routes mounted under `/api`.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analyze", post(analyze::analyze))
        .route("/history", get(history::list))
        .route("/history/{id}", get(history::get).delete(history::delete))
        .route("/languages", get(languages))
        .route("/health", get(health))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct LanguageResponse {
    pub code: &'static str,
    pub name: &'static str,
}

/// Languages the assistant can answer in.
pub async fn languages() -> Json<Vec<LanguageResponse>> {
    Json(
        Language::ALL
            .iter()
            .map(|lang| LanguageResponse {
                code: lang.code(),
                name: lang.display_name(),
            })
            .collect(),
    )
}

/// Map a pipeline error to a status and a user-facing message.
pub fn error_response(err: FarmhandError) -> (StatusCode, String) {
    let status = match &err {
        FarmhandError::Validation(_) => StatusCode::BAD_REQUEST,
        FarmhandError::Hashing(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FarmhandError::Busy => StatusCode::CONFLICT,
        FarmhandError::RemoteService(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(target: "farmhand::api", "{} {}", status.as_u16(), err);
    }
    (status, err.to_string())
}
