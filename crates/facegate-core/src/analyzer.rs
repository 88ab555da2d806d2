//! Face analysis entry point: decode an upload, detect faces, pick the
//! most prominent one and extract its embedding.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::Embedding;

const DETECTION_MODEL_FILE: &str = "det_10g.onnx";
const RECOGNITION_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("could not decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

/// Produces one face signature per image.
///
/// When an image contains several faces, implementations must use the
/// most prominent one (highest detection confidence) rather than an
/// arbitrary element of an unordered result list.
pub trait FaceAnalyzer: Send {
    fn encode(&mut self, image_bytes: &[u8]) -> Result<Embedding, AnalyzerError>;
}

/// ONNX-backed analyzer: SCRFD detection followed by ArcFace encoding.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxFaceAnalyzer {
    /// Load both models from a directory holding `det_10g.onnx` and
    /// `w600k_r50.onnx`. Fails fast if either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTION_MODEL_FILE))?;
        let encoder = FaceEncoder::load(&model_dir.join(RECOGNITION_MODEL_FILE))?;
        Ok(Self { detector, encoder })
    }

    fn encode_image(&mut self, image: &RgbImage) -> Result<Embedding, AnalyzerError> {
        let faces = self.detector.detect(image)?;

        // detect() sorts by descending confidence; the first entry is the
        // most prominent face.
        let face = faces.first().ok_or(AnalyzerError::NoFaceDetected)?;
        if faces.len() > 1 {
            tracing::debug!(
                count = faces.len(),
                confidence = face.confidence,
                "multiple faces in image; using the most prominent"
            );
        }

        Ok(self.encoder.encode(image, face)?)
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn encode(&mut self, image_bytes: &[u8]) -> Result<Embedding, AnalyzerError> {
        let image = image::load_from_memory(image_bytes)?.to_rgb8();
        self.encode_image(&image)
    }
}
