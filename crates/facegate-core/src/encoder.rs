//! ArcFace face encoder via ONNX Runtime.
//!
//! Crops a detected face, resizes it to the model's 112x112 input and
//! extracts an L2-normalized 512-dimensional embedding.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::detector::FaceBox;
use crate::types::Embedding;

const ENC_INPUT_SIZE: u32 = 112;
const ENC_MEAN: f32 = 127.5;
const ENC_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ENC_EMBEDDING_DIM: usize = 512;
/// Box expansion applied before cropping, as a fraction of each side.
const ENC_CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face encoder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded face recognition model");

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face.
    pub fn encode(&mut self, image: &RgbImage, face: &FaceBox) -> Result<Embedding, EncoderError> {
        let crop = crop_face(image, face);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ENC_EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ENC_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let mut embedding = Embedding::new(raw.to_vec());
        embedding.normalize();
        Ok(embedding)
    }
}

/// Crop the face box, expanded by a margin and clamped to image bounds,
/// then resize to the model input size.
fn crop_face(image: &RgbImage, face: &FaceBox) -> RgbImage {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let margin_x = face.width() * ENC_CROP_MARGIN;
    let margin_y = face.height() * ENC_CROP_MARGIN;

    let x1 = (face.x1 - margin_x).clamp(0.0, w - 1.0);
    let y1 = (face.y1 - margin_y).clamp(0.0, h - 1.0);
    let x2 = (face.x2 + margin_x).clamp(x1 + 1.0, w);
    let y2 = (face.y2 + margin_y).clamp(y1 + 1.0, h);

    let cropped = image::imageops::crop_imm(
        image,
        x1 as u32,
        y1 as u32,
        (x2 - x1) as u32,
        (y2 - y1) as u32,
    )
    .to_image();

    image::imageops::resize(
        &cropped,
        ENC_INPUT_SIZE,
        ENC_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    )
}

/// Convert a 112x112 crop into a BGR NCHW float tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let side = ENC_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

    for y in 0..side {
        for x in 0..side {
            let p = crop.get_pixel(x as u32, y as u32);
            tensor[[0, 0, y, x]] = (p[2] as f32 - ENC_MEAN) / ENC_STD;
            tensor[[0, 1, y, x]] = (p[1] as f32 - ENC_MEAN) / ENC_STD;
            tensor[[0, 2, y, x]] = (p[0] as f32 - ENC_MEAN) / ENC_STD;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let crop = RgbImage::from_pixel(ENC_INPUT_SIZE, ENC_INPUT_SIZE, image::Rgb([128, 128, 128]));
        let tensor = preprocess(&crop);

        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        let expected = (128.0 - ENC_MEAN) / ENC_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_bgr_order() {
        let crop = RgbImage::from_pixel(ENC_INPUT_SIZE, ENC_INPUT_SIZE, image::Rgb([255, 0, 10]));
        let tensor = preprocess(&crop);

        // Channel 0 is blue (10), channel 2 is red (255).
        assert!((tensor[[0, 0, 5, 5]] - (10.0 - ENC_MEAN) / ENC_STD).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - (255.0 - ENC_MEAN) / ENC_STD).abs() < 1e-6);
    }

    #[test]
    fn test_crop_face_clamps_to_bounds() {
        // A box hanging off the top-left corner must still produce a
        // full-size crop.
        let image = RgbImage::from_pixel(200, 200, image::Rgb([50, 60, 70]));
        let face = FaceBox {
            x1: -20.0,
            y1: -20.0,
            x2: 60.0,
            y2: 60.0,
            confidence: 0.9,
        };
        let crop = crop_face(&image, &face);
        assert_eq!(crop.dimensions(), (ENC_INPUT_SIZE, ENC_INPUT_SIZE));
    }

    #[test]
    fn test_crop_face_degenerate_box() {
        let image = RgbImage::from_pixel(100, 100, image::Rgb([0, 0, 0]));
        let face = FaceBox {
            x1: 50.0,
            y1: 50.0,
            x2: 50.0,
            y2: 50.0,
            confidence: 0.9,
        };
        // Zero-area boxes widen to at least one pixel instead of panicking.
        let crop = crop_face(&image, &face);
        assert_eq!(crop.dimensions(), (ENC_INPUT_SIZE, ENC_INPUT_SIZE));
    }
}
