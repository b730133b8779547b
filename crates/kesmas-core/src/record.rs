//! Staging records: the tagged union of case and workforce rows that feeds
//! a single load run.
//!
//! A [`MasterRecord`] lives only for the duration of one run. It is rebuilt
//! from the staging tables every time and never persisted by the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Record kind ─────────────────────────────────────────────────────────────

/// Which staging table a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
  /// Reported disease cases.
  Case,
  /// Headcount of a health-workforce role.
  Workforce,
}

impl RecordKind {
  /// The discriminant stored in `record_kind` / `kind` columns.
  pub fn as_str(self) -> &'static str {
    match self {
      RecordKind::Case => "case",
      RecordKind::Workforce => "workforce",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "case" => Ok(RecordKind::Case),
      "workforce" => Ok(RecordKind::Workforce),
      other => Err(Error::UnknownRecordKind(other.to_owned())),
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Master record ───────────────────────────────────────────────────────────

/// One row of the unioned staging table.
///
/// The natural keys (`region_code`, `year`, `category_label`) are optional so
/// that incomplete staging rows still reach the fact table with an unresolved
/// key instead of vanishing. `amount` is never missing: placeholders and
/// unparseable values are normalised to zero by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
  pub region_code:    Option<String>,
  pub region_name:    Option<String>,
  pub year:           Option<i32>,
  pub kind:           RecordKind,
  /// Disease name for [`RecordKind::Case`], role name for
  /// [`RecordKind::Workforce`].
  pub category_label: Option<String>,
  pub raw_value:      Option<String>,
  pub amount:         f64,
  pub source_file:    Option<String>,
}

impl MasterRecord {
  /// The disease label, if this is a case record.
  pub fn disease_label(&self) -> Option<&str> {
    match self.kind {
      RecordKind::Case => self.category_label.as_deref(),
      RecordKind::Workforce => None,
    }
  }

  /// The workforce role label, if this is a workforce record.
  pub fn workforce_label(&self) -> Option<&str> {
    match self.kind {
      RecordKind::Workforce => self.category_label.as_deref(),
      RecordKind::Case => None,
    }
  }
}

/// Whether `code` names a regency/city rather than a whole province.
///
/// Province-level aggregates carry numeric codes that are multiples of
/// 10 000. Codes that do not parse as numbers (dotted forms such as
/// `63.03.01`) are assumed to be sub-province.
pub fn is_sub_province(code: &str) -> bool {
  let digits: String = code.chars().filter(|c| !matches!(c, '.' | ' ')).collect();
  match digits.parse::<u64>() {
    Ok(n) => n % 10_000 != 0,
    Err(_) => true,
  }
}
