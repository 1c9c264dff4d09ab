use crate::error::ClassifyError;
use crate::models::classify_types::{ImageRef, Tensor};
use crate::services::collaborators::Decoder;
use async_trait::async_trait;
use image::ImageReader;
use ndarray::Array3;
use std::io::Cursor;

/// Fetches picked images over HTTP or from disk and decodes them to RGB.
#[derive(Clone, Default)]
pub struct ImageDecoder {
    client: reqwest::Client,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Decoder for ImageDecoder {
    async fn fetch_bytes(&self, image: &ImageRef) -> Result<Vec<u8>, ClassifyError> {
        match image.local_path() {
            Some(path) => tokio::fs::read(path).await.map_err(|e| {
                ClassifyError::Fetch(format!("Failed to read {}: {}", path.display(), e))
            }),
            None => {
                let response = self.client.get(image.uri()).send().await?;
                if !response.status().is_success() {
                    return Err(ClassifyError::Fetch(format!(
                        "Failed to fetch {}: HTTP {}",
                        image,
                        response.status()
                    )));
                }
                Ok(response.bytes().await?.to_vec())
            }
        }
    }

    async fn decode(&self, bytes: Vec<u8>) -> Result<Tensor, ClassifyError> {
        tokio::task::spawn_blocking(move || decode_rgb(&bytes))
            .await
            .map_err(|e| ClassifyError::Decode(format!("Decode task failed: {}", e)))?
    }
}

/// Decode any format `image` can sniff, upright per EXIF orientation.
pub fn decode_rgb(bytes: &[u8]) -> Result<Tensor, ClassifyError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ClassifyError::Decode(e.to_string()))?;

    if img.format().is_none() {
        return Err(ClassifyError::Decode("unrecognized image format".to_string()));
    }

    let img = apply_orientation(img.decode()?, read_orientation(bytes));
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();

    Array3::from_shape_vec((h as usize, w as usize, 3), rgb.into_raw())
        .map_err(|e| ClassifyError::Decode(format!("Failed to build tensor: {}", e)))
}

/// EXIF orientation tag, 1 when absent or unreadable.
fn read_orientation(bytes: &[u8]) -> u32 {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(e) => e,
        Err(_) => return 1,
    };

    match exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        Some(field) => match field.value {
            exif::Value::Short(ref v) => *v.first().unwrap_or(&1) as u32,
            exif::Value::Long(ref v) => *v.first().unwrap_or(&1),
            _ => 1,
        },
        None => 1,
    }
}

fn apply_orientation(img: image::DynamicImage, orientation: u32) -> image::DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_png_into_hwc_tensor() {
        let tensor = decode_rgb(&png_bytes(4, 2)).unwrap();
        assert_eq!(tensor.dim(), (2, 4, 3));
        assert_eq!(tensor[[0, 0, 0]], 255);
        assert_eq!(tensor[[0, 0, 1]], 0);
    }

    #[test]
    fn garbage_bytes_are_decode_errors() {
        let err = decode_rgb(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn truncated_png_is_decode_error() {
        let bytes = png_bytes(8, 8);
        let err = decode_rgb(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn orientation_six_rotates_quarter_turn() {
        let img = image::DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        let rotated = apply_orientation(img, 6);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
    }

    #[test]
    fn every_orientation_matches_image_crate() {
        let mut src = RgbImage::new(3, 2);
        for (i, px) in src.pixels_mut().enumerate() {
            *px = Rgb([i as u8, 0, 0]);
        }

        for tag in 2..=8u8 {
            let ours = apply_orientation(image::DynamicImage::ImageRgb8(src.clone()), tag as u32);
            let mut expected = image::DynamicImage::ImageRgb8(src.clone());
            expected.apply_orientation(image::metadata::Orientation::from_exif(tag).unwrap());

            assert_eq!(
                (ours.width(), ours.height()),
                (expected.width(), expected.height()),
                "orientation {}",
                tag
            );
            assert_eq!(ours.to_rgb8().into_raw(), expected.to_rgb8().into_raw(), "orientation {}", tag);
        }
    }

    #[test]
    fn orientation_five_transposes() {
        let mut src = RgbImage::new(3, 2);
        src.put_pixel(2, 0, Rgb([9, 9, 9]));
        let out = apply_orientation(image::DynamicImage::ImageRgb8(src), 5).to_rgb8();
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(0, 2), &Rgb([9, 9, 9]));
    }

    #[test]
    fn png_without_exif_defaults_to_upright() {
        assert_eq!(read_orientation(&png_bytes(2, 2)), 1);
    }

    #[tokio::test]
    async fn fetches_local_files_by_path_and_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        std::fs::write(&path, png_bytes(2, 2)).unwrap();

        let decoder = ImageDecoder::new();
        let by_path = decoder.fetch_bytes(&ImageRef::from_path(&path)).await.unwrap();
        let by_uri = decoder
            .fetch_bytes(&ImageRef::new(format!("file://{}", path.display())))
            .await
            .unwrap();
        assert_eq!(by_path, by_uri);
        assert_eq!(decoder.decode(by_path).await.unwrap().dim(), (2, 2, 3));
    }

    #[tokio::test]
    async fn decode_runs_on_blocking_pool_and_reports_garbage() {
        let decoder = ImageDecoder::new();
        let err = decoder.decode(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
        assert_eq!(decoder.decode(png_bytes(3, 1)).await.unwrap().dim(), (1, 3, 3));
    }

    #[tokio::test]
    async fn missing_file_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = ImageDecoder::new();
        let err = decoder
            .fetch_bytes(&ImageRef::from_path(&dir.path().join("gone.jpg")))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Fetch(_)));
    }
}
