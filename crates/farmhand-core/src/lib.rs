//! Core analysis pipeline and result cache for Farmhand.

mod analysis;
mod data_url;
mod error;
mod fingerprint;
mod history;
mod normalize;
mod orchestrator;
mod store;

pub use analysis::{
    AnalysisClient, AnalysisError, DEFAULT_GEMINI_API_BASE, DEFAULT_GEMINI_MODEL, GeminiClient,
    GeminiConfig, build_prompt,
};
pub use data_url::{DataUrl, parse_data_url, to_data_url};
pub use error::{FarmhandError, ValidationError};
pub use fingerprint::{fingerprint, fingerprint_reader};
pub use history::{DEFAULT_CAPACITY, HistoryLog, normalize_question};
pub use normalize::{
    DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY, NormalizeOptions, fit_dimensions, normalize,
};
pub use orchestrator::{ImageSource, Orchestrator, Submission};
pub use store::{HISTORY_SLOT, HistoryStore};

/// Result type for Farmhand operations.
pub type Result<T> = std::result::Result<T, FarmhandError>;
