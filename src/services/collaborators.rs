//! Seams between the classification screen and the things it drives.
//!
//! The controller only ever talks to these traits, so the ONNX engine, the
//! `image` decoder and the terminal pickers can be swapped for fakes.

use crate::error::ClassifyError;
use crate::models::classify_types::{ImageRef, PickOutcome, Prediction, Tensor};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Brings the numeric runtime up. Called once per mount.
    async fn ready(&self) -> Result<(), ClassifyError>;

    async fn load_model(&self) -> Result<Arc<dyn Model>, ClassifyError>;
}

#[async_trait]
pub trait Model: Send + Sync {
    /// Predictions in the model's own ranking order.
    async fn classify(&self, tensor: Tensor) -> Result<Vec<Prediction>, ClassifyError>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn pick_image(&self) -> Result<PickOutcome, ClassifyError>;
}

#[async_trait]
pub trait Decoder: Send + Sync {
    async fn fetch_bytes(&self, image: &ImageRef) -> Result<Vec<u8>, ClassifyError>;

    /// Turns fetched bytes into an upright `(h, w, 3)` tensor.
    async fn decode(&self, bytes: Vec<u8>) -> Result<Tensor, ClassifyError>;
}
