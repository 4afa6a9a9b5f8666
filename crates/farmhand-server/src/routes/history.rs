//! History routes.

use super::error_response;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use farmhand_types::{HistoryEntry, HistoryEntrySummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// An entry loaded back into view. Always served from the log.
#[derive(Serialize)]
pub struct SelectedEntry {
    #[serde(flatten)]
    pub entry: HistoryEntry,
    pub cached: bool,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntrySummary>,
}

/// Most recent first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let entries = state.orchestrator.entries().await;
    let limit = query.limit.unwrap_or(entries.len());

    Json(HistoryResponse {
        entries: entries
            .iter()
            .take(limit)
            .map(HistoryEntrySummary::from)
            .collect(),
    })
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SelectedEntry>, (StatusCode, String)> {
    state
        .orchestrator
        .select(id)
        .await
        .map(|entry| {
            Json(SelectedEntry {
                entry,
                cached: true,
            })
        })
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No history entry {}", id)))
}

/// Deleting an unknown id succeeds.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .orchestrator
        .delete(id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
