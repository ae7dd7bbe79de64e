//! Decision gate: turns classifier output into attendance decisions.
//!
//! The gate is the single place where the acceptance threshold is
//! applied. Everything upstream reports scores; everything downstream
//! (ledger, report) only ever sees decisions.

use crate::types::{Classification, Decision, RejectReason};
use chrono::Utc;

/// Confidence at or above this marks attendance. The bound is
/// inclusive: a score of exactly the threshold is accepted.
pub const DEFAULT_ACCEPT_THRESHOLD: f32 = 0.75;

pub struct DecisionGate {
    accept_threshold: f32,
}

impl DecisionGate {
    pub fn new(accept_threshold: f32) -> Self {
        Self { accept_threshold }
    }

    pub fn accept_threshold(&self) -> f32 {
        self.accept_threshold
    }

    /// Gate one classification per detected face.
    ///
    /// Faces are independent: a rejected face never blocks another face
    /// in the same frame from being accepted. An empty batch (no face
    /// found in the frame) yields a single no-face rejection so callers
    /// always get at least one decision to report.
    pub fn decide(&self, classifications: Vec<Classification>) -> Vec<Decision> {
        if classifications.is_empty() {
            return vec![Decision::Rejected {
                reason: RejectReason::NoFace,
                confidence: None,
            }];
        }

        classifications
            .into_iter()
            .map(|c| self.decide_one(c))
            .collect()
    }

    fn decide_one(&self, classification: Classification) -> Decision {
        match classification {
            Classification::Match {
                label, confidence, ..
            } => {
                if confidence >= self.accept_threshold {
                    Decision::Accepted {
                        label,
                        confidence,
                        timestamp: Utc::now(),
                    }
                } else {
                    Decision::Rejected {
                        reason: RejectReason::LowConfidence,
                        confidence: Some(confidence),
                    }
                }
            }
            Classification::Unknown { best_similarity } => Decision::Rejected {
                reason: RejectReason::LowConfidence,
                confidence: Some(best_similarity),
            },
            Classification::Ambiguous {
                first,
                second,
                confidence_gap,
            } => Decision::Ambiguous {
                first,
                second,
                confidence_gap,
            },
        }
    }
}

impl Default for DecisionGate {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPT_THRESHOLD)
    }
}
