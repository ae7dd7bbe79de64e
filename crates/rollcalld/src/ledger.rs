//! SQLite-backed attendance ledger.
//!
//! One row per (identity, session) pair, enforced by a unique
//! constraint. The mark operation is a single conflict-aware INSERT, so
//! concurrent requests for the same identity and session cannot produce
//! duplicate rows no matter how they interleave: exactly one caller
//! observes the first mark, the rest observe an already-marked outcome.

use crate::session::SessionKey;
use chrono::{DateTime, Utc};
use rollcall_core::IdentityLabel;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Outcome of a mark attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The identity was not yet marked in this session; a row was written.
    FirstMark,
    /// The identity was already marked; nothing changed.
    AlreadyMarked,
}

/// One persisted attendance row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub identity: String,
    pub display_name: String,
    pub session: String,
    pub confidence: f64,
    pub marked_at: String,
}

/// Handle to the attendance database. Cloning is cheap; all clones
/// share one background connection.
#[derive(Clone)]
pub struct AttendanceLedger {
    conn: Connection,
}

impl AttendanceLedger {
    /// Open (or create) the ledger at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS attendance (
                     id TEXT PRIMARY KEY,
                     identity TEXT NOT NULL,
                     display_name TEXT NOT NULL,
                     session TEXT NOT NULL,
                     confidence REAL NOT NULL,
                     marked_at TEXT NOT NULL,
                     UNIQUE(identity, session)
                 );
                 CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(session);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Mark an identity present in a session.
    ///
    /// Check and insert happen in one statement; the unique constraint
    /// decides the winner under concurrency.
    pub async fn mark(
        &self,
        session: &SessionKey,
        label: &IdentityLabel,
        confidence: f32,
        marked_at: DateTime<Utc>,
    ) -> Result<MarkOutcome, LedgerError> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = session.to_string();
        let identity = label.id.clone();
        let display_name = label.display_name.clone();
        let marked_at = marked_at.to_rfc3339();

        let affected = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "INSERT INTO attendance (id, identity, display_name, session, confidence, marked_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(identity, session) DO NOTHING",
                    rusqlite::params![id, identity, display_name, session, confidence, marked_at],
                )?;
                Ok(affected)
            })
            .await?;

        Ok(if affected > 0 {
            MarkOutcome::FirstMark
        } else {
            MarkOutcome::AlreadyMarked
        })
    }

    /// All rows for a session, ordered by mark time (identity breaks ties).
    pub async fn records_for_session(
        &self,
        session: &SessionKey,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let session = session.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identity, display_name, session, confidence, marked_at
                     FROM attendance WHERE session = ?1 ORDER BY marked_at, identity",
                )?;
                let rows = stmt.query_map([&session], |row| {
                    Ok(AttendanceRecord {
                        id: row.get(0)?,
                        identity: row.get(1)?,
                        display_name: row.get(2)?,
                        session: row.get(3)?,
                        confidence: row.get(4)?,
                        marked_at: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(LedgerError::from)
    }

    /// Number of marks in one session.
    pub async fn count_for_session(&self, session: &SessionKey) -> Result<u64, LedgerError> {
        let session = session.to_string();
        self.conn
            .call(move |conn| {
                let count: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE session = ?1",
                    [&session],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(LedgerError::from)
    }

    /// Total marks across all sessions.
    pub async fn count_all(&self) -> Result<u64, LedgerError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(LedgerError::from)
    }
}
