use serde::Serialize;
use thiserror::Error;

/// Every failure the classification screen can observe.
///
/// Cancelling the picker is not an error; see `PickOutcome::Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ClassifyError {
    #[error("inference engine failed to initialize: {0}")]
    EngineInit(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("image picker failed: {0}")]
    ImagePick(String),
    #[error("failed to fetch image: {0}")]
    Fetch(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClassifyError {
    fn from(err: reqwest::Error) -> Self {
        ClassifyError::Fetch(err.to_string())
    }
}

impl From<image::ImageError> for ClassifyError {
    fn from(err: image::ImageError) -> Self {
        ClassifyError::Decode(err.to_string())
    }
}
