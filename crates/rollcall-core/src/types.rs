use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A face located in a frame, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence that this region is a face, in [0, 1].
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        cosine(&self.values, &other.values)
    }
}

/// Cosine similarity of two equal-length vectors, in [-1, 1].
///
/// Always processes all dimensions; zero-norm inputs yield 0.0.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// An identity from the classifier artifact's closed label set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLabel {
    /// Opaque stable identifier (e.g., "alice.johnson").
    pub id: String,
    /// Human-readable name shown in reports.
    pub display_name: String,
}

/// Classifier outcome for one embedding.
#[derive(Debug, Clone)]
pub enum Classification {
    /// A single label cleared the classifier's internal margins.
    Match {
        label: IdentityLabel,
        /// Softmax confidence over the label set, in [0, 1].
        confidence: f32,
        /// Confidence gap to the runner-up label.
        margin: f32,
    },
    /// The top two labels scored too close together to pick one.
    Ambiguous {
        first: IdentityLabel,
        second: IdentityLabel,
        confidence_gap: f32,
    },
    /// No label cleared the minimum similarity floor.
    Unknown {
        /// Best raw cosine similarity observed, for diagnostics.
        best_similarity: f32,
    },
}

/// Why a face was rejected by the decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoFace,
    LowConfidence,
}

/// Gate outcome for one face. Only `Accepted` flows into the attendance ledger.
#[derive(Debug, Clone)]
pub enum Decision {
    Accepted {
        label: IdentityLabel,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },
    Rejected {
        reason: RejectReason,
        /// Classifier confidence where one was computed (absent for no-face).
        confidence: Option<f32>,
    },
    Ambiguous {
        first: IdentityLabel,
        second: IdentityLabel,
        confidence_gap: f32,
    },
}
