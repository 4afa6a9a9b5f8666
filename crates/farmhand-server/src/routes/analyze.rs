//! Submission route.

use super::error_response;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use farmhand_core::{ImageSource, Submission};
use farmhand_types::{Language, SubmissionOutcome};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Image as a `data:` URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub question: String,
    /// Language code. Absent means the configured default; unknown codes
    /// mean English.
    #[serde(default)]
    pub language: Option<String>,
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<SubmissionOutcome>, (StatusCode, String)> {
    let submission = Submission {
        image: req
            .image
            .filter(|url| !url.trim().is_empty())
            .map(ImageSource::DataUrl),
        question: req.question,
        language: req
            .language
            .as_deref()
            .map(Language::from_code_or_default)
            .unwrap_or(state.config.default_language),
    };

    let outcome = state
        .orchestrator
        .submit_detached(submission)
        .await
        .map_err(error_response)?;

    info!(
        target: "farmhand::api",
        entry_id = %outcome.entry_id,
        cached = outcome.cached,
        "Analysis answered"
    );
    Ok(Json(outcome))
}
