//! Recognition engine thread.
//!
//! ONNX sessions are not shared across threads; the engine owns them on
//! a dedicated OS thread and D-Bus handlers talk to it through a small
//! request channel. Recognition is pure compute with no side effects,
//! so an abandoned (timed-out) request leaves nothing behind.

use crate::config::Config;
use rollcall_core::{
    Decision, DecisionGate, FaceDetector, FaceEmbedder, Frame, IdentityClassifier, Pipeline,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] rollcall_core::embedder::EmbedderError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] rollcall_core::pipeline::PipelineError),
    #[error("recognition timed out after {0}s")]
    Timeout(u64),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<Decision>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run the recognition pipeline over one frame.
    ///
    /// The timeout covers the whole round-trip, queueing included. A
    /// timed-out request is abandoned: the engine may still finish the
    /// inference, but the reply is dropped and nothing was persisted on
    /// the caller's behalf.
    pub async fn recognize(
        &self,
        frame: Frame,
        timeout: std::time::Duration,
    ) -> Result<Vec<Decision>, EngineError> {
        match tokio::time::timeout(timeout, self.recognize_inner(frame)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout.as_secs())),
        }
    }

    async fn recognize_inner(&self, frame: Frame) -> Result<Vec<Decision>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously and fails fast if either is
/// unavailable, then enters the request loop. The classifier is loaded
/// by the caller beforehand (the daemon also needs its roster).
pub fn spawn_engine(
    config: &Config,
    classifier: IdentityClassifier,
) -> Result<EngineHandle, EngineError> {
    let scrfd_path = config.scrfd_model_path();
    let detector = FaceDetector::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path, "SCRFD detector loaded");

    let arcface_path = config.arcface_model_path();
    let embedder = FaceEmbedder::load(&arcface_path)?;
    tracing::info!(path = %arcface_path, "ArcFace embedder loaded");

    let gate = DecisionGate::new(config.accept_threshold);
    let mut pipeline = Pipeline::new(detector, embedder, classifier, gate);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { frame, reply } => {
                        let result = pipeline.process(&frame).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}
