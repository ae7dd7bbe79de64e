//! End-to-end recognition pipeline.
//!
//! Chains detection, normalization, embedding, classification and the
//! decision gate over a single frame. The pipeline owns the ONNX
//! sessions and is therefore `&mut self`; callers wanting concurrent
//! access put it behind a request channel (see the daemon's engine).

use crate::alignment;
use crate::classifier::IdentityClassifier;
use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::frame::Frame;
use crate::gate::DecisionGate;
use crate::types::Decision;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
}

pub struct Pipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    classifier: IdentityClassifier,
    gate: DecisionGate,
}

impl Pipeline {
    pub fn new(
        detector: FaceDetector,
        embedder: FaceEmbedder,
        classifier: IdentityClassifier,
        gate: DecisionGate,
    ) -> Self {
        Self {
            detector,
            embedder,
            classifier,
            gate,
        }
    }

    /// Run the full pipeline over one frame.
    ///
    /// Returns one decision per detected face, or a single no-face
    /// rejection when the frame contains none. Faces are processed in
    /// detection order (confidence descending), each one independently.
    pub fn process(&mut self, frame: &Frame) -> Result<Vec<Decision>, PipelineError> {
        let faces = self.detector.detect(frame)?;
        tracing::debug!(faces = faces.len(), "classifying detected faces");

        let mut classifications = Vec::with_capacity(faces.len());
        for face in &faces {
            let normalized = alignment::normalize(frame, face);
            let embedding = self.embedder.embed(&normalized)?;
            classifications.push(self.classifier.classify(&embedding));
        }

        Ok(self.gate.decide(classifications))
    }
}
