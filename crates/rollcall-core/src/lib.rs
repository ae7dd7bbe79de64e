//! The face-recognition attendance pipeline.
//!
//! Turns a decoded image frame into per-face attendance decisions:
//! SCRFD face detection, landmark alignment, ArcFace embeddings,
//! nearest-centroid identity classification, and threshold gating.
//! All inference runs via ONNX Runtime on CPU.

pub mod alignment;
pub mod classifier;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod gate;
pub mod pipeline;
pub mod types;

pub use classifier::IdentityClassifier;
pub use detector::FaceDetector;
pub use embedder::FaceEmbedder;
pub use frame::{Frame, FrameError};
pub use gate::DecisionGate;
pub use pipeline::Pipeline;
pub use types::{Classification, Decision, Embedding, FaceCandidate, IdentityLabel, RejectReason};
