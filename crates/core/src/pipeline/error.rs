use crate::shared::roi::RoiError;

/// Terminal failure of an indexing run.
///
/// Payloads are plain strings so the error can travel inside a completion
/// event to another thread.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Could not read video: {0}")]
    SourceUnavailable(String),
    #[error("Invalid region of interest: {0}")]
    InvalidRegion(String),
    #[error("Invalid processing parameters: {0}")]
    InvalidParameters(String),
    #[error("No faces detected in the selected region")]
    NoFacesDetected,
    #[error("Face detection failed: {0}")]
    Detection(String),
    #[error("Clustering failed: {0}")]
    Clustering(String),
    #[error("Saving results failed: {0}")]
    Persistence(String),
    #[error("Processing stopped unexpectedly: {0}")]
    WorkerPanicked(String),
}

impl From<RoiError> for PipelineError {
    fn from(e: RoiError) -> Self {
        PipelineError::InvalidRegion(e.to_string())
    }
}
