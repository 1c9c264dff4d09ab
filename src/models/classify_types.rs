use crate::error::ClassifyError;
use ndarray::Array3;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Decoded RGB pixels laid out as `(height, width, 3)`.
pub type Tensor = Array3<u8>;

/// Opaque reference to a picked image: a URI or a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(uri: impl Into<String>) -> Self {
        ImageRef(uri.into())
    }

    pub fn from_path(path: &Path) -> Self {
        ImageRef(path.to_string_lossy().to_string())
    }

    pub fn uri(&self) -> &str {
        &self.0
    }

    pub fn is_remote(&self) -> bool {
        let lower = self.0.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Local path for `file://` URIs and bare paths; `None` for remote URIs.
    pub fn local_path(&self) -> Option<&Path> {
        if self.is_remote() {
            return None;
        }
        Some(Path::new(self.0.strip_prefix("file://").unwrap_or(&self.0)))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Prediction {
    pub class_name: String,
    pub probability: f32,
}

/// Result of one picker interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Selected(ImageRef),
    Cancelled,
}

/// Outcome of classifying one image from a scripted run.
#[derive(Debug, Serialize, Clone)]
pub struct ClassifyResult {
    pub image: String,
    pub predictions: Vec<Prediction>,
    pub error: Option<ClassifyError>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ModelStatus {
    pub model_type: String,
    pub model_path: String,
    pub config_path: String,
    pub downloaded: bool,
}
