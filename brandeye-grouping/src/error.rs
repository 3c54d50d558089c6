//! Error types for brandeye-grouping

use thiserror::Error;
use brandeye_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum GroupingError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Brand database error: {0}")]
    BrandDatabase(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Grouping invariant violated: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl GroupingError {
    /// Caller-side problems (bad payloads) as opposed to service faults
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GroupingError::InvalidImage(_)
                | GroupingError::InvalidInput(_)
                | GroupingError::Core(CoreError::InvalidImage(_))
                | GroupingError::Core(CoreError::InvalidDetection(_))
        )
    }
}

impl From<GroupingError> for CoreError {
    fn from(err: GroupingError) -> Self {
        match err {
            GroupingError::InvalidImage(msg) => CoreError::InvalidImage(msg),
            GroupingError::Core(inner) => inner,
            other => CoreError::Grouping(other.to_string()),
        }
    }
}
