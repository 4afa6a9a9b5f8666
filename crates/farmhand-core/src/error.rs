//! Error types for Farmhand.

use thiserror::Error;

/// Input problems the user has to correct before resubmitting.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please upload an image of your crop.")]
    MissingImage,

    #[error("Please ask a question about the image.")]
    MissingQuestion,
}

#[derive(Error, Debug)]
pub enum FarmhandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Could not read image: {0}")]
    Hashing(String),

    /// Message comes verbatim from the analysis client.
    #[error("{0}")]
    RemoteService(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("A submission is already in progress")]
    Busy,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl FarmhandError {
    /// True for errors the user fixes by changing their input.
    pub fn is_validation(&self) -> bool {
        matches!(self, FarmhandError::Validation(_))
    }
}
