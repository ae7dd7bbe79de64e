//! Session keys: the unit of attendance bookkeeping.
//!
//! A session is one sitting of one group on one day, written
//! `YYYY-MM-DD/context` on the wire (for example `2026-03-02/CS101`).
//! Marking the same identity twice within a session is a no-op; marking
//! it in two different sessions produces two independent rows.

use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Upper bound on the context part, keeps report filenames sane.
pub const MAX_CONTEXT_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SessionKeyError {
    #[error("session key must be \"YYYY-MM-DD/context\", got {0:?}")]
    InvalidFormat(String),
    #[error("invalid session date {0:?}")]
    InvalidDate(String),
    #[error("invalid session context {0:?}: {1}")]
    InvalidContext(String, &'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    date: NaiveDate,
    context: String,
}

impl SessionKey {
    /// Parse the canonical `YYYY-MM-DD/context` form.
    pub fn parse(raw: &str) -> Result<Self, SessionKeyError> {
        let Some((date_part, context)) = raw.split_once('/') else {
            return Err(SessionKeyError::InvalidFormat(raw.to_string()));
        };
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|_| SessionKeyError::InvalidDate(date_part.to_string()))?;
        validate_context(context)?;
        Ok(Self {
            date,
            context: context.to_string(),
        })
    }

    /// Filesystem-safe stem for per-session artifacts (report files,
    /// staged frames). `2026-03-02/CS101` becomes `2026-03-02_CS101`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.date, self.context)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date, self.context)
    }
}

fn validate_context(context: &str) -> Result<(), SessionKeyError> {
    if context.is_empty() {
        return Err(SessionKeyError::InvalidContext(
            context.to_string(),
            "must not be empty",
        ));
    }
    if context.len() > MAX_CONTEXT_LEN {
        return Err(SessionKeyError::InvalidContext(
            context.to_string(),
            "longer than 64 characters",
        ));
    }
    if !context
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(SessionKeyError::InvalidContext(
            context.to_string(),
            "only ASCII letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    Ok(())
}
