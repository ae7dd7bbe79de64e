use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::ledger::{AttendanceLedger, MarkOutcome};
use crate::report::{ReportRow, ReportWriter, STATUS_PRESENT};
use crate::session::SessionKey;
use rollcall_core::{Decision, Frame, IdentityLabel, RejectReason};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub ledger: AttendanceLedger,
    pub reports: ReportWriter,
    pub roster: Vec<IdentityLabel>,
}

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    pub state: Arc<Mutex<AppState>>,
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Recognize the faces in an image and mark attendance for a session.
    ///
    /// `session` is the canonical `YYYY-MM-DD/context` key, `image` an
    /// encoded image (PNG/JPEG). Returns a JSON object with one entry
    /// per detected face; faces are decided independently, so a single
    /// frame can mark several identities at once.
    async fn mark_attendance(&self, session: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(session, bytes = image.len(), "mark_attendance requested");

        let session = SessionKey::parse(session)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;

        let frame = Frame::decode(&image).map_err(|e| {
            tracing::warn!(error = %e, "rejecting undecodable image");
            zbus::fdo::Error::InvalidArgs(e.to_string())
        })?;

        // Copy handles while holding the lock, then release for inference
        let (engine, timeout, staging_dir) = {
            let state = self.state.lock().await;
            (
                state.engine.clone(),
                Duration::from_secs(state.config.recognize_timeout_secs),
                state.config.staging_dir.clone(),
            )
        };

        // Archive before recognizing so failed attempts leave a trace too
        if let Some(dir) = staging_dir {
            stage_image(&dir, &session, &image);
        }

        // Run the engine (no lock held)
        let decisions = engine.recognize(frame, timeout).await.map_err(|e| {
            tracing::error!(error = %e, session = %session, "recognition failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;

        // Persist accepted decisions (re-acquire lock; appends serialize here)
        let state = self.state.lock().await;
        let mut results = Vec::with_capacity(decisions.len());
        for decision in &decisions {
            results.push(apply_decision(&state.ledger, &state.reports, &session, decision).await?);
        }

        Ok(serde_json::json!({
            "session": session.to_string(),
            "decisions": results,
        })
        .to_string())
    }

    /// Rebuild the CSV report for a session from the ledger.
    ///
    /// Marked identities become Present rows in mark order; everyone
    /// else on the roster becomes an Absent row. Returns the path of
    /// the written file.
    async fn export_report(&self, session: &str) -> zbus::fdo::Result<String> {
        tracing::info!(session, "export_report requested");

        let session = SessionKey::parse(session)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;

        let state = self.state.lock().await;
        let records = state
            .ledger
            .records_for_session(&session)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "export: ledger read failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        let path = state
            .reports
            .export(&session, &records, &state.roster)
            .map_err(|e| {
                tracing::error!(error = %e, "export: report write failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        tracing::info!(path = %path.display(), present = records.len(), "report exported");
        Ok(path.display().to_string())
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        let total_marks = state.ledger.count_all().await.unwrap_or(0);

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "enrolled_identities": state.roster.len(),
            "attendance_marks": total_marks,
            "accept_threshold": state.config.accept_threshold,
        })
        .to_string())
    }

    /// List enrolled identities as JSON.
    async fn list_labels(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        serde_json::to_string(&state.roster).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

/// Apply one decision: accepted faces are marked in the ledger and, on
/// a first mark, appended to the session report. The returned JSON is
/// the per-face entry of the method response.
///
/// A report append failure surfaces as an error, but the mark it
/// followed is already durable; `export_report` rebuilds the file.
async fn apply_decision(
    ledger: &AttendanceLedger,
    reports: &ReportWriter,
    session: &SessionKey,
    decision: &Decision,
) -> zbus::fdo::Result<serde_json::Value> {
    match decision {
        Decision::Accepted {
            label,
            confidence,
            timestamp,
        } => {
            let outcome = ledger
                .mark(session, label, *confidence, *timestamp)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, identity = %label.id, "ledger mark failed");
                    zbus::fdo::Error::Failed(e.to_string())
                })?;

            match outcome {
                MarkOutcome::FirstMark => {
                    let row = ReportRow {
                        name: label.display_name.clone(),
                        status: STATUS_PRESENT.to_string(),
                        time: timestamp.format("%H:%M:%S").to_string(),
                    };
                    reports.append(session, &row).map_err(|e| {
                        tracing::error!(error = %e, identity = %label.id, "report append failed");
                        zbus::fdo::Error::Failed(format!(
                            "attendance recorded but report append failed \
                             (re-run export_report): {e}"
                        ))
                    })?;

                    tracing::info!(
                        identity = %label.id,
                        session = %session,
                        confidence,
                        "attendance marked"
                    );
                    Ok(serde_json::json!({
                        "status": "accepted",
                        "identity": label.id,
                        "display_name": label.display_name,
                        "confidence": confidence,
                        "marked_at": timestamp.to_rfc3339(),
                    }))
                }
                MarkOutcome::AlreadyMarked => {
                    tracing::info!(identity = %label.id, session = %session, "repeat mark ignored");
                    Ok(serde_json::json!({
                        "status": "already_marked",
                        "identity": label.id,
                        "display_name": label.display_name,
                        "message": "already recorded in this session",
                    }))
                }
            }
        }
        Decision::Rejected { reason, confidence } => Ok(match reason {
            RejectReason::NoFace => serde_json::json!({
                "status": "rejected",
                "reason": "no_face",
                "message": "no face detected in the image",
            }),
            RejectReason::LowConfidence => serde_json::json!({
                "status": "rejected",
                "reason": "low_confidence",
                "confidence": confidence,
                "message": "no enrolled identity matched with enough confidence",
            }),
        }),
        Decision::Ambiguous {
            first,
            second,
            confidence_gap,
        } => Ok(serde_json::json!({
            "status": "rejected",
            "reason": "ambiguous",
            "candidates": [first.display_name, second.display_name],
            "confidence_gap": confidence_gap,
            "message": "two enrolled identities are too close to call, retake the image",
        })),
    }
}

/// Archive a submitted image for audit. Best-effort: failures are
/// logged and never block marking.
fn stage_image(dir: &Path, session: &SessionKey, image: &[u8]) {
    let ext = match image::guess_format(image) {
        Ok(format) => format.extensions_str().first().copied().unwrap_or("img"),
        Err(_) => "img",
    };
    let name = format!("{}_{}.{ext}", session.file_stem(), uuid::Uuid::new_v4());
    let path = dir.join(name);

    let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, image));
    if let Err(e) = result {
        tracing::warn!(error = %e, path = %path.display(), "failed to stage image");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scratch_reports(tag: &str) -> ReportWriter {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        ReportWriter::new(std::env::temp_dir().join(format!("rollcall-dbus-test-{tag}-{nanos}")))
    }

    async fn memory_ledger() -> AttendanceLedger {
        AttendanceLedger::open(Path::new(":memory:")).await.unwrap()
    }

    fn alice() -> IdentityLabel {
        IdentityLabel {
            id: "alice".to_string(),
            display_name: "Alice Liddell".to_string(),
        }
    }

    fn key() -> SessionKey {
        SessionKey::parse("2026-03-02/CS101").unwrap()
    }

    #[tokio::test]
    async fn test_accepted_decision_marks_once_and_appends_once() {
        let ledger = memory_ledger().await;
        let reports = scratch_reports("accept");
        let session = key();
        let decision = Decision::Accepted {
            label: alice(),
            confidence: 0.91,
            timestamp: Utc::now(),
        };

        let first = apply_decision(&ledger, &reports, &session, &decision)
            .await
            .unwrap();
        assert_eq!(first["status"], "accepted");
        assert_eq!(first["identity"], "alice");

        let second = apply_decision(&ledger, &reports, &session, &decision)
            .await
            .unwrap();
        assert_eq!(second["status"], "already_marked");

        assert_eq!(ledger.count_for_session(&session).await.unwrap(), 1);

        let path = reports.report_path(&session);
        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.deserialize::<ReportRow>().count(), 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_mark_survives_report_append_failure() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        // A plain file where the reports directory should be makes every
        // append fail while the ledger keeps working.
        let blocked = std::env::temp_dir().join(format!("rollcall-dbus-test-blocked-{nanos}"));
        std::fs::write(&blocked, b"not a directory").unwrap();

        let ledger = memory_ledger().await;
        let reports = ReportWriter::new(blocked.clone());
        let session = key();
        let decision = Decision::Accepted {
            label: alice(),
            confidence: 0.91,
            timestamp: Utc::now(),
        };

        let err = apply_decision(&ledger, &reports, &session, &decision)
            .await
            .unwrap_err();
        match err {
            zbus::fdo::Error::Failed(msg) => {
                assert!(
                    msg.contains("re-run export_report"),
                    "unexpected message: {msg}"
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        // The mark committed before the append attempt.
        assert_eq!(ledger.count_for_session(&session).await.unwrap(), 1);

        // export over a usable directory recovers the lost row.
        let records = ledger.records_for_session(&session).await.unwrap();
        let recovered = scratch_reports("append-fail-recovery");
        let path = recovered.export(&session, &records, &[alice()]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<ReportRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Alice Liddell");
        assert_eq!(rows[0].status, STATUS_PRESENT);

        let _ = std::fs::remove_file(&blocked);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_no_face_rejection_payload() {
        let ledger = memory_ledger().await;
        let reports = scratch_reports("noface");
        let decision = Decision::Rejected {
            reason: RejectReason::NoFace,
            confidence: None,
        };

        let value = apply_decision(&ledger, &reports, &key(), &decision)
            .await
            .unwrap();
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["reason"], "no_face");
        assert_eq!(ledger.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_rejection_carries_score() {
        let ledger = memory_ledger().await;
        let reports = scratch_reports("lowconf");
        let decision = Decision::Rejected {
            reason: RejectReason::LowConfidence,
            confidence: Some(0.54),
        };

        let value = apply_decision(&ledger, &reports, &key(), &decision)
            .await
            .unwrap();
        assert_eq!(value["reason"], "low_confidence");
        assert!((value["confidence"].as_f64().unwrap() - 0.54).abs() < 1e-6);
        assert_eq!(ledger.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_rejection_names_both_candidates() {
        let ledger = memory_ledger().await;
        let reports = scratch_reports("ambig");
        let decision = Decision::Ambiguous {
            first: alice(),
            second: IdentityLabel {
                id: "bob".to_string(),
                display_name: "Bob Cratchit".to_string(),
            },
            confidence_gap: 0.02,
        };

        let value = apply_decision(&ledger, &reports, &key(), &decision)
            .await
            .unwrap();
        assert_eq!(value["reason"], "ambiguous");
        assert_eq!(value["candidates"][0], "Alice Liddell");
        assert_eq!(value["candidates"][1], "Bob Cratchit");
        assert_eq!(ledger.count_all().await.unwrap(), 0);
    }
}
