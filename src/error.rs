use thiserror::Error;

/// Failures on the checkpoint load path, from fetch through parameter binding.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("failed to fetch s3://{bucket}/{key}: {reason}")]
    FetchFailed {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("checkpoint deserialization failed: {0}")]
    DeserializeFailed(String),
    #[error("checkpoint is a bare state map: {0}")]
    AmbiguousCheckpoint(String),
}

/// Failures on the per-request prediction path.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Load(#[from] LoadError),
}
