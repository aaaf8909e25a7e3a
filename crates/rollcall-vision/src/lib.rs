//! rollcall-vision: Face detection and embedding for the rollcall kiosk.
//!
//! SCRFD finds faces and landmarks, each face is aligned to the ArcFace
//! reference layout, and ArcFace turns the crop into an embedding. Both
//! models run on CPU through ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod recognizer;

pub use detector::{DetectorError, FaceBox, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use image::RgbImage;
use rollcall_core::{EmbedError, Embedding, FaceEmbedder};
use std::path::Path;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Cosine similarity above which two w600k_r50 faces are the same person.
pub const ARCFACE_COSINE_THRESHOLD: f32 = 0.40;

/// [`ARCFACE_COSINE_THRESHOLD`] as a Euclidean distance. Embeddings are unit
/// length, so `d = sqrt(2 - 2 * cos)`.
pub const ARCFACE_EUCLIDEAN_TOLERANCE: f32 = 1.095;

impl From<DetectorError> for EmbedError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(path) => EmbedError::ModelUnavailable(path),
            other => EmbedError::Inference(other.to_string()),
        }
    }
}

impl From<RecognizerError> for EmbedError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(path) => EmbedError::ModelUnavailable(path),
            other => EmbedError::Inference(other.to_string()),
        }
    }
}

/// [`FaceEmbedder`] backed by SCRFD + ArcFace.
pub struct OnnxFaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEmbedder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        let faces = self.detector.detect(image)?;
        let mut embeddings = Vec::with_capacity(faces.len());

        for face in &faces {
            match self.recognizer.extract(image, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::debug!(confidence = face.confidence, "face without landmarks skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(faces = faces.len(), embedded = embeddings.len(), "frame embedded");
        Ok(embeddings)
    }
}
