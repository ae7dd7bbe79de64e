//! Identity classifier over ArcFace embeddings.
//!
//! The classifier is loaded from a JSON artifact produced by the
//! enrollment tooling. The artifact carries one centroid embedding per
//! enrolled identity plus scoring parameters, and is integrity-checked
//! against an embedded fingerprint before use. Classification is a pure
//! function: cosine similarity against every centroid, softmax over the
//! scores, and margin analysis between the top two candidates.

use crate::types::{cosine, Classification, Embedding, IdentityLabel};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

/// Artifact format revision this build can load.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier artifact not found: {0} (enroll identities first)")]
    ArtifactNotFound(String),
    #[error("artifact io: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported artifact format version {found}, expected {ARTIFACT_FORMAT_VERSION}")]
    UnsupportedVersion { found: u32 },
    #[error("artifact was trained against embedding model {found:?}, daemon runs {expected:?}")]
    ModelMismatch { expected: String, found: String },
    #[error("artifact fingerprint mismatch, file is corrupt or was edited by hand")]
    FingerprintMismatch,
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
}

/// Scoring parameters carried inside the artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassifierParams {
    /// Softmax temperature applied to raw cosine similarities. Lower
    /// values sharpen the distribution.
    pub softmax_temperature: f32,
    /// Raw cosine similarity below which the embedding matches nobody.
    pub min_similarity: f32,
    /// Minimum confidence gap between the top two candidates. Anything
    /// tighter is reported as ambiguous rather than a match.
    pub ambiguity_margin: f32,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            softmax_temperature: 0.1,
            min_similarity: 0.3,
            ambiguity_margin: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabelEntry {
    id: String,
    display_name: String,
    centroid: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactFile {
    format_version: u32,
    embedding_model: String,
    fingerprint: String,
    params: ClassifierParams,
    labels: Vec<LabelEntry>,
}

/// Nearest-centroid identity classifier.
#[derive(Debug)]
pub struct IdentityClassifier {
    embedding_model: String,
    fingerprint: String,
    params: ClassifierParams,
    labels: Vec<LabelEntry>,
}

impl IdentityClassifier {
    /// Load and validate a classifier artifact.
    ///
    /// `expected_model` and `expected_dim` come from the embedding
    /// generator the daemon runs; an artifact trained against anything
    /// else is rejected rather than silently producing garbage scores.
    pub fn load(
        path: &Path,
        expected_model: &str,
        expected_dim: usize,
    ) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::ArtifactNotFound(
                path.display().to_string(),
            ));
        }

        let raw = std::fs::read_to_string(path)?;
        let artifact: ArtifactFile = serde_json::from_str(&raw)?;

        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ClassifierError::UnsupportedVersion {
                found: artifact.format_version,
            });
        }
        if artifact.embedding_model != expected_model {
            return Err(ClassifierError::ModelMismatch {
                expected: expected_model.to_string(),
                found: artifact.embedding_model,
            });
        }
        if artifact.labels.is_empty() {
            return Err(ClassifierError::InvalidArtifact(
                "artifact contains no enrolled identities".to_string(),
            ));
        }
        for label in &artifact.labels {
            if label.centroid.len() != expected_dim {
                return Err(ClassifierError::InvalidArtifact(format!(
                    "label {:?} has a {}-dim centroid, expected {expected_dim}",
                    label.id,
                    label.centroid.len()
                )));
            }
            if label.centroid.iter().any(|v| !v.is_finite()) {
                return Err(ClassifierError::InvalidArtifact(format!(
                    "label {:?} has a non-finite centroid value",
                    label.id
                )));
            }
        }
        for (i, label) in artifact.labels.iter().enumerate() {
            if artifact.labels[..i].iter().any(|l| l.id == label.id) {
                return Err(ClassifierError::InvalidArtifact(format!(
                    "duplicate label id {:?}",
                    label.id
                )));
            }
        }
        if !artifact.params.softmax_temperature.is_finite()
            || artifact.params.softmax_temperature <= 0.0
        {
            return Err(ClassifierError::InvalidArtifact(
                "softmax_temperature must be positive".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&artifact.params.min_similarity) {
            return Err(ClassifierError::InvalidArtifact(
                "min_similarity must be within [-1, 1]".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&artifact.params.ambiguity_margin) {
            return Err(ClassifierError::InvalidArtifact(
                "ambiguity_margin must be within [0, 1)".to_string(),
            ));
        }

        let expected_fingerprint = compute_fingerprint(
            &artifact.embedding_model,
            &artifact.params,
            &artifact.labels,
        );
        if artifact.fingerprint != expected_fingerprint {
            return Err(ClassifierError::FingerprintMismatch);
        }

        tracing::info!(
            path = %path.display(),
            labels = artifact.labels.len(),
            model = %artifact.embedding_model,
            fingerprint = &artifact.fingerprint[..12],
            "loaded classifier artifact"
        );

        Ok(Self {
            embedding_model: artifact.embedding_model,
            fingerprint: artifact.fingerprint,
            params: artifact.params,
            labels: artifact.labels,
        })
    }

    /// Score an embedding against every enrolled identity.
    pub fn classify(&self, embedding: &Embedding) -> Classification {
        let sims: Vec<f32> = self
            .labels
            .iter()
            .map(|l| cosine(&embedding.values, &l.centroid))
            .collect();

        let best_idx = argmax(&sims);
        let best_sim = sims[best_idx];

        if best_sim < self.params.min_similarity {
            return Classification::Unknown {
                best_similarity: best_sim,
            };
        }

        let confidences = softmax(&sims, self.params.softmax_temperature);
        let confidence = confidences[best_idx];

        // Second-best confidence is 0.0 when only one identity is enrolled.
        let second_idx = (0..self.labels.len())
            .filter(|&i| i != best_idx)
            .max_by(|&a, &b| confidences[a].total_cmp(&confidences[b]));

        let gap = match second_idx {
            Some(i) => confidence - confidences[i],
            None => confidence,
        };

        if let Some(i) = second_idx {
            if gap < self.params.ambiguity_margin {
                return Classification::Ambiguous {
                    first: self.labels[best_idx].identity(),
                    second: self.labels[i].identity(),
                    confidence_gap: gap,
                };
            }
        }

        Classification::Match {
            label: self.labels[best_idx].identity(),
            confidence,
            margin: gap,
        }
    }

    /// Enrolled identities in artifact order.
    pub fn roster(&self) -> Vec<IdentityLabel> {
        self.labels.iter().map(|l| l.identity()).collect()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }
}

impl LabelEntry {
    fn identity(&self) -> IdentityLabel {
        IdentityLabel {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// SHA-256 over every artifact field except the fingerprint itself.
/// String fields are NUL-terminated so adjacent fields cannot alias,
/// floats are hashed as little-endian bits.
fn compute_fingerprint(
    embedding_model: &str,
    params: &ClassifierParams,
    labels: &[LabelEntry],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(embedding_model.as_bytes());
    hasher.update([0u8]);
    hasher.update(params.softmax_temperature.to_le_bytes());
    hasher.update(params.min_similarity.to_le_bytes());
    hasher.update(params.ambiguity_margin.to_le_bytes());
    for label in labels {
        hasher.update(label.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(label.display_name.as_bytes());
        hasher.update([0u8]);
        for v in &label.centroid {
            hasher.update(v.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for i in 1..values.len() {
        if values[i] > values[best] {
            best = i;
        }
    }
    best
}

/// Max-subtracted softmax over `scores / temperature`.
fn softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores
        .iter()
        .map(|s| ((s - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const DIM: usize = 4;
    const MODEL: &str = "w600k_r50";

    fn temp_artifact_path() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rollcall-classifier-test-{nanos}.json"))
    }

    fn label(id: &str, name: &str, centroid: Vec<f32>) -> LabelEntry {
        LabelEntry {
            id: id.to_string(),
            display_name: name.to_string(),
            centroid,
        }
    }

    fn sample_artifact() -> ArtifactFile {
        let params = ClassifierParams::default();
        let labels = vec![
            label("alice", "Alice Liddell", vec![1.0, 0.0, 0.0, 0.0]),
            label("bob", "Bob Cratchit", vec![0.0, 1.0, 0.0, 0.0]),
            label("carol", "Carol Danvers", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        let fingerprint = compute_fingerprint(MODEL, &params, &labels);
        ArtifactFile {
            format_version: ARTIFACT_FORMAT_VERSION,
            embedding_model: MODEL.to_string(),
            fingerprint,
            params,
            labels,
        }
    }

    fn write_artifact(artifact: &ArtifactFile) -> PathBuf {
        let path = temp_artifact_path();
        std::fs::write(&path, serde_json::to_string(artifact).unwrap()).unwrap();
        path
    }

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: Some(MODEL.to_string()),
        }
    }

    #[test]
    fn test_load_and_classify_clear_match() {
        let path = write_artifact(&sample_artifact());
        let classifier = IdentityClassifier::load(&path, MODEL, DIM).unwrap();
        let _ = std::fs::remove_file(&path);

        match classifier.classify(&embedding(vec![0.98, 0.1, 0.05, 0.0])) {
            Classification::Match {
                label, confidence, ..
            } => {
                assert_eq!(label.id, "alice");
                assert!(confidence > 0.9, "confidence {confidence} should be decisive");
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_below_min_similarity() {
        let path = write_artifact(&sample_artifact());
        let classifier = IdentityClassifier::load(&path, MODEL, DIM).unwrap();
        let _ = std::fs::remove_file(&path);

        // Orthogonal to every centroid.
        match classifier.classify(&embedding(vec![0.0, 0.0, 0.0, 1.0])) {
            Classification::Unknown { best_similarity } => {
                assert!(best_similarity < 0.3);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_ambiguous_when_centroids_tie() {
        let path = write_artifact(&sample_artifact());
        let classifier = IdentityClassifier::load(&path, MODEL, DIM).unwrap();
        let _ = std::fs::remove_file(&path);

        // Exactly between alice and bob.
        let v = std::f32::consts::FRAC_1_SQRT_2;
        match classifier.classify(&embedding(vec![v, v, 0.0, 0.0])) {
            Classification::Ambiguous {
                first,
                second,
                confidence_gap,
            } => {
                let mut pair = [first.id, second.id];
                pair.sort();
                assert_eq!(pair, ["alice".to_string(), "bob".to_string()]);
                assert!(confidence_gap < 0.1);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_single_label_is_never_ambiguous() {
        let params = ClassifierParams::default();
        let labels = vec![label("alice", "Alice Liddell", vec![1.0, 0.0, 0.0, 0.0])];
        let fingerprint = compute_fingerprint(MODEL, &params, &labels);
        let path = write_artifact(&ArtifactFile {
            format_version: ARTIFACT_FORMAT_VERSION,
            embedding_model: MODEL.to_string(),
            fingerprint,
            params,
            labels,
        });
        let classifier = IdentityClassifier::load(&path, MODEL, DIM).unwrap();
        let _ = std::fs::remove_file(&path);

        match classifier.classify(&embedding(vec![1.0, 0.0, 0.0, 0.0])) {
            Classification::Match { confidence, .. } => {
                assert!((confidence - 1.0).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_missing_artifact() {
        let path = temp_artifact_path();
        let err = IdentityClassifier::load(&path, MODEL, DIM).unwrap_err();
        assert!(matches!(err, ClassifierError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_rejects_unsupported_format_version() {
        let mut artifact = sample_artifact();
        artifact.format_version = 99;
        let path = write_artifact(&artifact);
        let err = IdentityClassifier::load(&path, MODEL, DIM).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            err,
            ClassifierError::UnsupportedVersion { found: 99 }
        ));
    }

    #[test]
    fn test_rejects_embedding_model_mismatch() {
        let path = write_artifact(&sample_artifact());
        let err = IdentityClassifier::load(&path, "r100_glint360k", DIM).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ClassifierError::ModelMismatch { .. }));
    }

    #[test]
    fn test_rejects_tampered_centroid() {
        let mut artifact = sample_artifact();
        artifact.labels[1].centroid[0] = 0.5;
        let path = write_artifact(&artifact);
        let err = IdentityClassifier::load(&path, MODEL, DIM).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ClassifierError::FingerprintMismatch));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let path = write_artifact(&sample_artifact());
        let err = IdentityClassifier::load(&path, MODEL, 512).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ClassifierError::InvalidArtifact(_)));
    }

    #[test]
    fn test_rejects_duplicate_label_ids() {
        let params = ClassifierParams::default();
        let labels = vec![
            label("alice", "Alice Liddell", vec![1.0, 0.0, 0.0, 0.0]),
            label("alice", "Alice Doppel", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        let fingerprint = compute_fingerprint(MODEL, &params, &labels);
        let path = write_artifact(&ArtifactFile {
            format_version: ARTIFACT_FORMAT_VERSION,
            embedding_model: MODEL.to_string(),
            fingerprint,
            params,
            labels,
        });
        let err = IdentityClassifier::load(&path, MODEL, DIM).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ClassifierError::InvalidArtifact(_)));
    }

    #[test]
    fn test_rejects_empty_roster() {
        let params = ClassifierParams::default();
        let fingerprint = compute_fingerprint(MODEL, &params, &[]);
        let path = write_artifact(&ArtifactFile {
            format_version: ARTIFACT_FORMAT_VERSION,
            embedding_model: MODEL.to_string(),
            fingerprint,
            params,
            labels: vec![],
        });
        let err = IdentityClassifier::load(&path, MODEL, DIM).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ClassifierError::InvalidArtifact(_)));
    }

    #[test]
    fn test_roster_preserves_artifact_order() {
        let path = write_artifact(&sample_artifact());
        let classifier = IdentityClassifier::load(&path, MODEL, DIM).unwrap();
        let _ = std::fs::remove_file(&path);

        let roster = classifier.roster();
        let ids: Vec<&str> = roster.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["alice", "bob", "carol"]);
        assert_eq!(roster[0].display_name, "Alice Liddell");
    }

    #[test]
    fn test_fingerprint_is_stable_across_serialization() {
        let artifact = sample_artifact();
        let json = serde_json::to_string(&artifact).unwrap();
        let reparsed: ArtifactFile = serde_json::from_str(&json).unwrap();
        assert_eq!(
            compute_fingerprint(&reparsed.embedding_model, &reparsed.params, &reparsed.labels),
            artifact.fingerprint
        );
    }
}
