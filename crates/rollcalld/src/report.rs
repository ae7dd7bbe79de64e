//! CSV attendance reports.
//!
//! One report file per session under the reports directory, named after
//! the session file stem. Rows are appended as marks happen; `export`
//! rebuilds the whole file from the ledger (including absentees from
//! the roster), which is also the recovery path when an append failed
//! after its mark was already durable.

use crate::ledger::AttendanceRecord;
use crate::session::SessionKey;
use rollcall_core::IdentityLabel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const STATUS_PRESENT: &str = "Present";
pub const STATUS_ABSENT: &str = "Absent";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report io: {0}")]
    Io(#[from] std::io::Error),
    #[error("report csv: {0}")]
    Csv(#[from] csv::Error),
}

/// One report line. Serialized field names are the CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: String,
    /// Mark time as `HH:MM:SS` (UTC), empty for absentees.
    #[serde(rename = "Time")]
    pub time: String,
}

/// Writes per-session CSV reports. Cloning is cheap; appends are
/// serialized by the caller (the daemon funnels them through one lock).
#[derive(Clone)]
pub struct ReportWriter {
    reports_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(reports_dir: PathBuf) -> Self {
        Self { reports_dir }
    }

    /// Report file path for a session.
    pub fn report_path(&self, session: &SessionKey) -> PathBuf {
        self.reports_dir.join(format!("{}.csv", session.file_stem()))
    }

    /// Append one row, writing the header only when the file is new.
    pub fn append(&self, session: &SessionKey, row: &ReportRow) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(&self.reports_dir)?;
        let path = self.report_path(session);
        let exists = path.exists();

        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;

        Ok(path)
    }

    /// Rebuild the full report for a session.
    ///
    /// Present rows come from the ledger in mark order; every roster
    /// identity without a mark gets an Absent row with an empty time.
    /// Any existing file is truncated, so the result reflects exactly
    /// the ledger state at the time of the call.
    pub fn export(
        &self,
        session: &SessionKey,
        records: &[AttendanceRecord],
        roster: &[IdentityLabel],
    ) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(&self.reports_dir)?;
        let path = self.report_path(session);
        let mut writer = csv::Writer::from_path(&path)?;

        let mut marked: HashSet<&str> = HashSet::with_capacity(records.len());
        for record in records {
            marked.insert(record.identity.as_str());
            writer.serialize(ReportRow {
                name: record.display_name.clone(),
                status: STATUS_PRESENT.to_string(),
                time: format_mark_time(&record.marked_at),
            })?;
        }

        for label in roster {
            if !marked.contains(label.id.as_str()) {
                writer.serialize(ReportRow {
                    name: label.display_name.clone(),
                    status: STATUS_ABSENT.to_string(),
                    time: String::new(),
                })?;
            }
        }

        writer.flush()?;
        Ok(path)
    }
}

/// `HH:MM:SS` from an RFC 3339 timestamp. Falls back to the raw string
/// rather than dropping the row if the ledger ever holds an unparsable
/// value.
pub fn format_mark_time(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}
