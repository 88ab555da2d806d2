//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the det_10g SCRFD model over letterboxed RGB uploads and decodes
//! its anchor-free per-stride outputs into pixel-space face boxes.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            outputs = num_outputs,
            "loaded face detection model"
        );

        // Score and bbox tensors for the three strides, at minimum.
        // Landmark tensors may follow but are unused here.
        if num_outputs < DET_STRIDES.len() * 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model exports {num_outputs} outputs, expected at least {}",
                DET_STRIDES.len() * 2
            )));
        }

        Ok(Self { session })
    }

    /// Detect faces in an RGB image, returning boxes sorted by descending
    /// confidence. An empty vector means no face cleared the confidence
    /// threshold.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, scale) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Standard SCRFD export ordering: [0-2] = scores for strides
        // 8/16/32, [3-5] = bbox deltas for the same strides.
        let mut candidates = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[pos + DET_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            decode_stride(scores, deltas, stride, scale, &mut candidates);
        }

        let mut faces = nms(candidates, DET_NMS_THRESHOLD);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(faces)
    }
}

/// Letterbox an RGB image into the detector's square input tensor.
///
/// The image is scaled to fit, anchored top-left, and padded with the
/// model mean so padding normalizes to zero. Channels are written in BGR
/// order, which the InsightFace model family expects. Returns the tensor
/// and the scale used, so box coordinates map back with a single divide.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = DET_INPUT_SIZE;
    let (w, h) = (image.width(), image.height());
    let scale = size as f32 / w.max(h) as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for y in 0..side {
        for x in 0..side {
            let (b, g, r) = if (x as u32) < new_w && (y as u32) < new_h {
                let p = resized.get_pixel(x as u32, y as u32);
                (p[2] as f32, p[1] as f32, p[0] as f32)
            } else {
                (DET_MEAN, DET_MEAN, DET_MEAN)
            };
            tensor[[0, 0, y, x]] = (b - DET_MEAN) / DET_STD;
            tensor[[0, 1, y, x]] = (g - DET_MEAN) / DET_STD;
            tensor[[0, 2, y, x]] = (r - DET_MEAN) / DET_STD;
        }
    }

    (tensor, scale)
}

/// Decode one stride level: anchor centers lie on a stride-spaced grid,
/// bbox deltas are [left, top, right, bottom] offsets in stride units.
fn decode_stride(
    scores: &[f32],
    deltas: &[f32],
    stride: usize,
    scale: f32,
    out: &mut Vec<FaceBox>,
) {
    let grid = DET_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }

        let off = idx * 4;
        if off + 3 >= deltas.len() {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let cx = ((cell % grid) * stride) as f32;
        let cy = ((cell / grid) * stride) as f32;
        let s = stride as f32;

        out.push(FaceBox {
            x1: (cx - deltas[off] * s) / scale,
            y1: (cy - deltas[off + 1] * s) / scale,
            x2: (cx + deltas[off + 2] * s) / scale,
            y2: (cy + deltas[off + 3] * s) / scale,
            confidence: score,
        });
    }
}

/// Non-Maximum Suppression over candidate boxes.
fn nms(mut candidates: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for cand in candidates {
        if keep.iter().all(|k| iou(k, &cand) <= iou_threshold) {
            keep.push(cand);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
