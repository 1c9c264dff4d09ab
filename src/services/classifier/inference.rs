use crate::error::ClassifyError;
use crate::models::classify_types::{Prediction, Tensor};
use crate::services::collaborators::Model;
use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use std::sync::{Arc, Mutex};

const CROP_PCT: f32 = 0.875;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize, center crop and normalize an `(h, w, 3)` tensor into NCHW input.
pub fn preprocess_tensor(tensor: &Tensor, crop_size: u32) -> Result<Array4<f32>, ClassifyError> {
    let (h, w, channels) = tensor.dim();
    if channels != 3 || h == 0 || w == 0 {
        return Err(ClassifyError::Decode(format!(
            "expected a non-empty (height, width, 3) tensor, got {:?}",
            tensor.dim()
        )));
    }

    let raw: Vec<u8> = tensor.iter().copied().collect();
    let rgb = RgbImage::from_raw(w as u32, h as u32, raw)
        .ok_or_else(|| ClassifyError::Decode("tensor does not match its dimensions".to_string()))?;
    let img = DynamicImage::ImageRgb8(rgb);

    // Only the centered square of the short side survives the final crop.
    let (x, y, side) = center_square(img.width(), img.height());
    let square = img.crop_imm(x, y, side, side);

    // Resize shortest edge to ceil(crop_size / crop_pct), then center crop
    let resize_size = (crop_size as f32 / CROP_PCT).ceil() as u32;
    let resized = square.resize_exact(resize_size, resize_size, image::imageops::FilterType::Triangle);

    let offset = resize_size.saturating_sub(crop_size) / 2;
    let cropped = resized.crop_imm(offset, offset, crop_size, crop_size);
    let rgb = cropped.to_rgb8();

    // Normalize in HWC order, then transpose to CHW in tiles.
    let raw = rgb.into_raw();
    let hw = (crop_size * crop_size) as usize;
    let mut interleaved = vec![0f32; 3 * hw];
    for (i, pixel) in raw.chunks_exact(3).enumerate() {
        let off = i * 3;
        interleaved[off] = (pixel[0] as f32 / 255.0 - MEAN[0]) / STD[0];
        interleaved[off + 1] = (pixel[1] as f32 / 255.0 - MEAN[1]) / STD[1];
        interleaved[off + 2] = (pixel[2] as f32 / 255.0 - MEAN[2]) / STD[2];
    }

    let mut data = vec![0f32; 3 * hw];
    const TILE: usize = 1024;
    for base in (0..hw).step_by(TILE) {
        let end = (base + TILE).min(hw);
        for i in base..end {
            let src = i * 3;
            data[i] = interleaved[src];
            data[hw + i] = interleaved[src + 1];
            data[2 * hw + i] = interleaved[src + 2];
        }
    }

    Array4::from_shape_vec((1, 3, crop_size as usize, crop_size as usize), data)
        .map_err(|e| ClassifyError::Inference(format!("Failed to create tensor: {}", e)))
}

/// Softmax over `logits`, then the `top_k` most probable labels.
pub fn top_predictions(logits: &[f32], labels: &[String], top_k: usize) -> Vec<Prediction> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_sum: f32 = logits.iter().map(|&x| (x - max_logit).exp()).sum();

    let mut indexed: Vec<(usize, f32)> = logits
        .iter()
        .map(|&x| (x - max_logit).exp() / exp_sum)
        .enumerate()
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.truncate(top_k);

    indexed
        .into_iter()
        .map(|(idx, probability)| Prediction {
            class_name: labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", idx)),
            probability,
        })
        .collect()
}

/// Centered square spanning the short side, as `(x, y, side)`.
fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let side = width.min(height);
    ((width - side) / 2, (height - side) / 2, side)
}

pub fn run_inference(
    session: &mut Session,
    input: Array4<f32>,
    labels: &[String],
    top_k: usize,
) -> Result<Vec<Prediction>, ClassifyError> {
    // Single-input image models
    let input_name = session.inputs()[0].name().to_string();

    let input_tensor = Value::from_array(input)
        .map_err(|e| ClassifyError::Inference(format!("Failed to create tensor value: {}", e)))?;

    let outputs = session
        .run(ort::inputs![input_name.as_str() => input_tensor])
        .map_err(|e| ClassifyError::Inference(format!("Inference failed: {}", e)))?;

    let output_value = outputs
        .values()
        .next()
        .ok_or_else(|| ClassifyError::Inference("Model produced no outputs".to_string()))?;

    let (_, logits) = output_value
        .try_extract_tensor::<f32>()
        .map_err(|e| ClassifyError::Inference(format!("Failed to extract output tensor: {}", e)))?;

    Ok(top_predictions(logits, labels, top_k))
}

/// A loaded ONNX session plus the label table it was exported with.
pub struct OrtModel {
    session: Arc<Mutex<Session>>,
    labels: Arc<Vec<String>>,
    top_k: usize,
    crop_size: u32,
}

impl OrtModel {
    pub fn new(session: Session, labels: Vec<String>, top_k: usize, crop_size: u32) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            labels: Arc::new(labels),
            top_k,
            crop_size,
        }
    }
}

#[async_trait]
impl Model for OrtModel {
    async fn classify(&self, tensor: Tensor) -> Result<Vec<Prediction>, ClassifyError> {
        let session = self.session.clone();
        let labels = self.labels.clone();
        let (top_k, crop_size) = (self.top_k, self.crop_size);

        tokio::task::spawn_blocking(move || {
            let input = preprocess_tensor(&tensor, crop_size)?;
            let mut guard = session
                .lock()
                .map_err(|_| ClassifyError::Inference("Model session lock poisoned".to_string()))?;
            run_inference(&mut guard, input, &labels, top_k)
        })
        .await
        .map_err(|e| ClassifyError::Inference(format!("Inference task failed: {}", e)))?
    }
}
