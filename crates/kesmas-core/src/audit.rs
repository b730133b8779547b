//! Audit log entries: one per pipeline invocation, append-only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Outcome of a pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
  Success,
  Failed,
}

impl RunStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      RunStatus::Success => "SUCCESS",
      RunStatus::Failed => "FAILED",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "SUCCESS" => Ok(RunStatus::Success),
      "FAILED" => Ok(RunStatus::Failed),
      other => Err(Error::UnknownRunStatus(other.to_owned())),
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A row of `etl_audit_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
  pub id:           i64,
  /// Local wall-clock time the run finished, `YYYY-MM-DD HH:MM:SS`.
  pub timestamp:    String,
  pub process_name: String,
  pub status:       RunStatus,
  pub message:      Option<String>,
  pub duration_sec: f64,
  pub rows_loaded:  u64,
}
