//! [`StagingReader`]: unions the case and workforce staging tables into the
//! master record set of a run.
//!
//! Each staging table lives in its own SQLite file whose table name is the
//! file stem (`stg_kasus_penyakit.db` holds `stg_kasus_penyakit`). Cells may
//! be stored with any SQLite type and are coerced here.

use std::path::{Path, PathBuf};

use kesmas_core::{
  numeric::parse_decimal,
  record::{MasterRecord, RecordKind, is_sub_province},
};
use rusqlite::types::ValueRef;

use crate::{Error, Result, store};

const STAGING_COLUMNS: &str = "region_code, region_name, year, category_label, \
                               raw_value, cleaned_numeric_value, source_file";

/// Reads the two staging tables of a run.
#[derive(Debug, Clone)]
pub struct StagingReader {
  case_db:      PathBuf,
  workforce_db: PathBuf,
}

impl StagingReader {
  pub fn new(case_db: impl Into<PathBuf>, workforce_db: impl Into<PathBuf>) -> Self {
    Self { case_db: case_db.into(), workforce_db: workforce_db.into() }
  }

  /// Read and tag every staging row, case rows first.
  ///
  /// A missing staging file is skipped with a warning. Fails with
  /// [`Error::StagingEmpty`] if no rows remain, before anything has been
  /// mutated.
  pub fn read_master(&self) -> Result<Vec<MasterRecord>> {
    let mut master = Vec::new();
    for (path, kind) in [
      (&self.case_db, RecordKind::Case),
      (&self.workforce_db, RecordKind::Workforce),
    ] {
      match read_staging_table(path, kind)? {
        Some(rows) => {
          tracing::info!(kind = %kind, rows = rows.len(), path = %path.display(), "read staging table");
          master.extend(rows);
        }
        None => {
          tracing::warn!(kind = %kind, path = %path.display(), "staging file not found; skipping");
        }
      }
    }

    if master.is_empty() {
      return Err(Error::StagingEmpty);
    }
    tracing::info!(rows = master.len(), "master table assembled");
    Ok(master)
  }
}

/// Read one staging file. Returns `None` if the file does not exist.
fn read_staging_table(path: &Path, kind: RecordKind) -> Result<Option<Vec<MasterRecord>>> {
  if !path.exists() {
    return Ok(None);
  }
  let table = table_name(path)?;
  let conn = store::open_read_only(path)?;

  let mut stmt = conn.prepare(&format!("SELECT {STAGING_COLUMNS} FROM \"{table}\""))?;
  let rows = stmt
    .query_map([], |row| {
      Ok(MasterRecord {
        region_code:    text_of(row.get_ref(0)?),
        region_name:    text_of(row.get_ref(1)?),
        year:           year_of(row.get_ref(2)?),
        kind,
        category_label: text_of(row.get_ref(3)?),
        raw_value:      text_of(row.get_ref(4)?),
        amount:         amount_of(row.get_ref(5)?),
        source_file:    text_of(row.get_ref(6)?),
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let before = rows.len();
  let rows: Vec<MasterRecord> = rows
    .into_iter()
    .filter(|r| r.region_code.as_deref().is_none_or(is_sub_province))
    .collect();
  if rows.len() < before {
    tracing::warn!(
      kind = %kind,
      dropped = before - rows.len(),
      "dropped province-level staging rows"
    );
  }

  Ok(Some(rows))
}

/// The staging table name: the file stem, restricted to identifier
/// characters.
fn table_name(path: &Path) -> Result<String> {
  let stem = path
    .file_stem()
    .and_then(|s| s.to_str())
    .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
  match stem {
    Some(s) => Ok(s.to_owned()),
    None => Err(Error::io(
      path,
      std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "staging file stem is not a valid table name",
      ),
    )),
  }
}

// ─── Cell coercion ───────────────────────────────────────────────────────────

fn text_of(value: ValueRef<'_>) -> Option<String> {
  match value {
    ValueRef::Null | ValueRef::Blob(_) => None,
    ValueRef::Integer(i) => Some(i.to_string()),
    ValueRef::Real(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some((f as i64).to_string()),
    ValueRef::Real(f) => Some(f.to_string()),
    ValueRef::Text(bytes) => {
      let s = String::from_utf8_lossy(bytes);
      let trimmed = s.trim();
      (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }
  }
}

fn year_of(value: ValueRef<'_>) -> Option<i32> {
  match value {
    ValueRef::Integer(i) => i32::try_from(i).ok(),
    ValueRef::Real(f) if f.fract() == 0.0 => i32::try_from(f as i64).ok(),
    ValueRef::Text(_) => text_of(value)
      .as_deref()
      .and_then(parse_decimal)
      .filter(|f| f.fract() == 0.0)
      .and_then(|f| i32::try_from(f as i64).ok()),
    _ => None,
  }
}

/// Cleaned values are never null in the master table.
fn amount_of(value: ValueRef<'_>) -> f64 {
  match value {
    ValueRef::Integer(i) => i as f64,
    ValueRef::Real(f) if f.is_finite() => f,
    ValueRef::Text(_) => text_of(value).as_deref().and_then(parse_decimal).unwrap_or(0.0),
    _ => 0.0,
  }
}
