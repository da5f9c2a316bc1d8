use thiserror::Error;

/// Request-fatal rejections a caller needs to tell apart from transport
/// failures. Everything else travels as a plain `anyhow::Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForgeError {
    #[error("Project not found")]
    ProjectNotFound(String),
    #[error("Training is already in progress for this project.")]
    TrainingInProgress(String),
    #[error("No captioned images found. Upload and caption images first.")]
    NoCaptionedImages(String),
    #[error("None of the captioned images could be downloaded for training.")]
    EmptyDataset(String),
    #[error("Another training submission for this project was accepted first.")]
    ConcurrentSubmission(String),
    #[error("{0} is not configured")]
    MissingConfig(&'static str),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ForgeError {
    pub fn http_status(&self) -> u16 {
        match self {
            ForgeError::ProjectNotFound(_) => 404,
            ForgeError::TrainingInProgress(_)
            | ForgeError::NoCaptionedImages(_)
            | ForgeError::EmptyDataset(_)
            | ForgeError::InvalidRequest(_) => 400,
            ForgeError::ConcurrentSubmission(_) => 409,
            ForgeError::MissingConfig(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_client_statuses() {
        assert_eq!(ForgeError::ProjectNotFound("p".into()).http_status(), 404);
        assert_eq!(ForgeError::NoCaptionedImages("p".into()).http_status(), 400);
        assert_eq!(
            ForgeError::ConcurrentSubmission("p".into()).http_status(),
            409
        );
        assert_eq!(
            ForgeError::MissingConfig("REPLICATE_MODEL_OWNER").to_string(),
            "REPLICATE_MODEL_OWNER is not configured"
        );
    }

    #[test]
    fn survives_a_round_trip_through_anyhow() {
        let err: anyhow::Error = ForgeError::TrainingInProgress("p1".into()).into();
        let err = err.context("submit failed");
        assert_eq!(
            err.downcast_ref::<ForgeError>(),
            Some(&ForgeError::TrainingInProgress("p1".into()))
        );
    }
}
