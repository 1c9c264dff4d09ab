use crate::controller::state::{Phase, ScreenState};
use crate::models::classify_types::Prediction;
use serde::Serialize;
use std::fmt;

pub const CHOOSE_IMAGE_HINT: &str = "Tap to choose image";
pub const PREDICTING_TEXT: &str = "Predicting...";
pub const UNABLE_TO_PREDICT_TEXT: &str = "Unable to predict";

/// What the screen shows for a given state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenView {
    pub engine_ready: bool,
    pub model_ready: bool,
    pub image: Option<String>,
    pub hint: Option<&'static str>,
    pub status: Option<&'static str>,
    pub predictions: Vec<Prediction>,
    pub error: Option<String>,
}

impl ScreenView {
    pub fn from_state(state: &ScreenState) -> Self {
        let hint = (state.model_ready && state.current_image.is_none()).then_some(CHOOSE_IMAGE_HINT);

        let status = match state.phase {
            Phase::ImageSelected | Phase::Classifying => Some(PREDICTING_TEXT),
            Phase::Classified | Phase::Failed if state.predictions.is_empty() => {
                Some(UNABLE_TO_PREDICT_TEXT)
            }
            _ => None,
        };

        Self {
            engine_ready: state.engine_ready,
            model_ready: state.model_ready,
            image: state.current_image.as_ref().map(|i| i.to_string()),
            hint,
            status,
            predictions: state.predictions.clone(),
            error: state.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}

fn indicator(ready: bool) -> &'static str {
    if ready {
        "ready"
    } else {
        "loading..."
    }
}

impl fmt::Display for ScreenView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Predict")?;
        writeln!(f, "Engine ready? {}", indicator(self.engine_ready))?;
        writeln!(f, "Model ready? {}", indicator(self.model_ready))?;

        if let Some(image) = &self.image {
            writeln!(f, "Image: {}", image)?;
        }
        if let Some(hint) = self.hint {
            writeln!(f, "[ {} ]", hint)?;
        }

        if self.image.is_some() {
            writeln!(f, "Predictions:")?;
            for p in &self.predictions {
                writeln!(f, "  {} ({:.1}%)", p.class_name, p.probability * 100.0)?;
            }
        }
        if let Some(status) = self.status {
            writeln!(f, "{}", status)?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "Error: {}", error)?;
        }
        Ok(())
    }
}
