//! History entry types.

use crate::AnalysisResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One past question + image + result interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Generated at insertion, never reused.
    pub id: Uuid,
    /// When the entry was first inserted.
    pub created_at: DateTime<Utc>,
    /// Insertion or most recent promotion time.
    pub last_touched_at: DateTime<Utc>,
    /// Normalized preview of the submitted image (`data:` URL).
    pub preview_image: String,
    /// The question exactly as the user typed it.
    pub question: String,
    /// The stored analysis result.
    pub result: AnalysisResult,
    /// SHA-256 of the raw submitted image bytes, lowercase hex.
    pub image_fingerprint: String,
}

impl HistoryEntry {
    /// Create a new entry with a fresh id, touched now.
    pub fn new(
        image_fingerprint: String,
        question: String,
        preview_image: String,
        result: AnalysisResult,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_touched_at: now,
            preview_image,
            question,
            result,
            image_fingerprint,
        }
    }
}

/// Listing view of an entry: the stored thumbnail, without the result image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntrySummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub question: String,
    /// Normalized preview of the submitted image.
    pub preview_image: String,
    /// First 120 chars of the result text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    pub has_result_image: bool,
}

impl From<&HistoryEntry> for HistoryEntrySummary {
    fn from(e: &HistoryEntry) -> Self {
        Self {
            id: e.id,
            created_at: e.created_at,
            last_touched_at: e.last_touched_at,
            question: e.question.clone(),
            preview_image: e.preview_image.clone(),
            text_preview: e.result.text.as_deref().map(|t| truncate_preview(t, 120)),
            has_result_image: e.result.image.is_some(),
        }
    }
}

fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(max_chars).collect();
    preview.push_str("...");
    preview
}
