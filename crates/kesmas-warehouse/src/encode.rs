//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings. Surrogate keys are stored as
//! nullable integers; `NULL` means the key did not resolve.

use chrono::{DateTime, Utc};
use kesmas_core::fact::{FactRow, FactSubject, SurrogateId};
use kesmas_core::record::RecordKind;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Surrogate keys ──────────────────────────────────────────────────────────

pub fn encode_id(id: Option<SurrogateId>) -> Option<i64> { id.map(|SurrogateId(n)| n) }

pub fn decode_id(raw: Option<i64>) -> Option<SurrogateId> { raw.map(SurrogateId) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `fact_health` row.
pub struct RawFact {
  pub id:            i64,
  pub region_id:     Option<i64>,
  pub year_id:       Option<i64>,
  pub disease_id:    Option<i64>,
  pub workforce_id:  Option<i64>,
  pub assumption_id: Option<i64>,
  pub record_kind:   String,
  pub amount:        f64,
  pub source_file:   Option<String>,
  pub created_at:    String,
}

impl RawFact {
  pub fn into_fact(self) -> Result<FactRow> {
    let kind = RecordKind::parse(&self.record_kind)?;
    let subject = FactSubject::from_columns(
      self.id,
      kind,
      decode_id(self.disease_id),
      decode_id(self.workforce_id),
      decode_id(self.assumption_id),
    )?;

    Ok(FactRow {
      id: self.id,
      region_id: decode_id(self.region_id),
      year_id: decode_id(self.year_id),
      subject,
      amount: self.amount,
      source_file: self.source_file,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
