//! facegate-core — face analysis for the facegate service.
//!
//! Decodes uploaded images, detects faces (SCRFD), extracts embeddings
//! (ArcFace) and matches probe embeddings against enrolled signatures,
//! all via ONNX Runtime on CPU.

pub mod analyzer;
pub mod detector;
pub mod encoder;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use detector::FaceBox;
pub use types::{Embedding, GalleryEntry, MatchOutcome, Matcher, NearestMatcher};
