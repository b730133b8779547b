//! AuditLogger: appends one row per pipeline invocation to
//! `etl_audit_log`.
//!
//! The audit table lives in its own store file, so rebuilding or recovering
//! the warehouse never touches run history.

use std::path::Path;

use chrono::{DateTime, Local, Utc};
use kesmas_core::audit::{AuditLogEntry, RunStatus};
use rusqlite::{Connection, params};

use crate::{Result, schema::ensure_audit_table, store};

/// Local wall-clock format of `etl_audit_log.timestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A finished run, ready to be recorded.
#[derive(Debug, Clone)]
pub struct RunRecord<'a> {
  pub process_name: &'a str,
  pub status:       RunStatus,
  pub message:      Option<String>,
  pub started_at:   DateTime<Utc>,
  pub finished_at:  DateTime<Utc>,
  pub rows_loaded:  u64,
}

impl RunRecord<'_> {
  /// Wall-clock seconds between start and finish. Never negative.
  pub fn duration_sec(&self) -> f64 {
    let millis = (self.finished_at - self.started_at).num_milliseconds().max(0);
    millis as f64 / 1000.0
  }
}

/// Append-only handle on the audit store.
pub struct AuditLog {
  conn: Connection,
}

impl AuditLog {
  /// Open the audit store at `path`, creating the file and table on first
  /// use.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = store::open(path)?;
    ensure_audit_table(&conn)?;
    Ok(Self { conn })
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = store::open_in_memory()?;
    ensure_audit_table(&conn)?;
    Ok(Self { conn })
  }

  /// Append `run` and return the new row's id.
  pub fn record(&self, run: &RunRecord<'_>) -> Result<i64> {
    let timestamp = run.finished_at.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string();
    self.conn.execute(
      "INSERT INTO etl_audit_log
         (timestamp, process_name, status, message, duration_sec, rows_loaded)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        timestamp,
        run.process_name,
        run.status.as_str(),
        run.message,
        run.duration_sec(),
        i64::try_from(run.rows_loaded).unwrap_or(i64::MAX),
      ],
    )?;
    let id = self.conn.last_insert_rowid();
    tracing::debug!(id, process = run.process_name, status = %run.status, "audit row written");
    Ok(id)
  }

  /// Every entry, oldest first.
  pub fn entries(&self) -> Result<Vec<AuditLogEntry>> { self.query(None) }

  /// The `limit` most recent entries, oldest first.
  pub fn recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>> { self.query(Some(limit)) }

  fn query(&self, limit: Option<usize>) -> Result<Vec<AuditLogEntry>> {
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let mut stmt = self.conn.prepare(
      "SELECT id, timestamp, process_name, status, message, duration_sec, rows_loaded
       FROM etl_audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let raws = stmt
      .query_map([limit], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<String>>(4)?,
          row.get::<_, f64>(5)?,
          row.get::<_, i64>(6)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries = raws
      .into_iter()
      .map(|(id, timestamp, process_name, status, message, duration_sec, rows)| -> Result<_> {
        Ok(AuditLogEntry {
          id,
          timestamp,
          process_name,
          status: RunStatus::parse(&status)?,
          message,
          duration_sec,
          rows_loaded: u64::try_from(rows).unwrap_or(0),
        })
      })
      .collect::<Result<Vec<_>>>()?;
    entries.reverse();
    Ok(entries)
  }
}
