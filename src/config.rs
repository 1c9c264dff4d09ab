use crate::error::ClassifyError;
use crate::services::classifier::model_manager::ModelType;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "photo-predict.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_dir: PathBuf,
    pub model_type: ModelType,
    pub use_gpu: bool,
    pub top_k: usize,
    pub auto_download: bool,
    pub intra_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_type: ModelType::MobileNetV2,
            use_gpu: false,
            top_k: 3,
            auto_download: true,
            intra_threads: 4,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ClassifyError> {
        if self.top_k == 0 {
            return Err(ClassifyError::Config("top_k must be at least 1".into()));
        }
        if self.intra_threads == 0 {
            return Err(ClassifyError::Config("intra_threads must be at least 1".into()));
        }
        Ok(())
    }
}

/// Defaults, then the TOML file, then `PHOTO_PREDICT_*` environment variables.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ClassifyError> {
    let mut settings = match path {
        Some(p) => {
            let raw = fs::read_to_string(p).map_err(|e| {
                ClassifyError::Config(format!("Failed to read {}: {}", p.display(), e))
            })?;
            parse_settings(&raw)?
        }
        None => match fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Ok(raw) => parse_settings(&raw)?,
            Err(_) => Settings::default(),
        },
    };

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub fn parse_settings(raw: &str) -> Result<Settings, ClassifyError> {
    toml::from_str(raw).map_err(|e| ClassifyError::Config(format!("Invalid settings file: {}", e)))
}

fn apply_env<F>(settings: &mut Settings, lookup: F) -> Result<(), ClassifyError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PHOTO_PREDICT_MODEL_DIR") {
        settings.model_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("PHOTO_PREDICT_MODEL_TYPE") {
        settings.model_type = v.parse().map_err(ClassifyError::Config)?;
    }
    if let Some(v) = lookup("PHOTO_PREDICT_USE_GPU") {
        settings.use_gpu = parse_bool(&v).ok_or_else(|| {
            ClassifyError::Config(format!("PHOTO_PREDICT_USE_GPU: expected a boolean, got {:?}", v))
        })?;
    }
    if let Some(v) = lookup("PHOTO_PREDICT_TOP_K") {
        settings.top_k = v.trim().parse().map_err(|e| {
            ClassifyError::Config(format!("PHOTO_PREDICT_TOP_K: {}", e))
        })?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
