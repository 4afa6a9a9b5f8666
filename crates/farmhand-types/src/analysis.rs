//! Analysis result types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output of one call to the remote analysis service.
///
/// Images are carried as `data:` URLs so they can be stored and served
/// without a separate blob store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Advice text, if the service returned any.
    #[serde(default)]
    pub text: Option<String>,
    /// Edited or annotated image as a `data:` URL.
    #[serde(default)]
    pub image: Option<String>,
}

impl AnalysisResult {
    /// A result carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// True when neither text nor image is present.
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image.is_none()
    }
}

/// What a submission hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    /// History entry holding this result.
    pub entry_id: Uuid,
    /// The service response on a miss, the stored (normalized) copy on a hit.
    pub result: AnalysisResult,
    /// True when served from the history log without calling the service.
    pub cached: bool,
}
