//! FactLoader: resolves each master record's natural keys against the
//! freshly loaded dimensions and writes one `fact_health` row per record.
//!
//! Resolution has left-join semantics: a key that does not match any
//! dimension row is stored as `NULL` and the fact is kept.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use kesmas_core::{
  fact::{FactRow, FactSubject, SurrogateId},
  record::{MasterRecord, RecordKind},
};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::{
  Result,
  encode::{RawFact, encode_dt, encode_id},
  schema::reset_sequences,
};

/// Facts whose key did not resolve, per key.
///
/// `assumption` counts workforce facts whose role is not covered by the
/// reference; that is expected whenever the reference is partial or absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnresolvedCounts {
  pub region:     usize,
  pub year:       usize,
  pub disease:    usize,
  pub workforce:  usize,
  pub assumption: usize,
}

impl UnresolvedCounts {
  /// Unresolved keys other than the optional assumption key.
  pub fn required(&self) -> usize {
    self.region + self.year + self.disease + self.workforce
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FactLoadReport {
  pub rows_written: usize,
  pub unresolved:   UnresolvedCounts,
}

/// Natural key → surrogate id, one map per dimension.
#[derive(Debug, Default)]
struct Lookups {
  regions:     HashMap<String, SurrogateId>,
  years:       HashMap<i32, SurrogateId>,
  diseases:    HashMap<String, SurrogateId>,
  workforce:   HashMap<String, SurrogateId>,
  /// Keyed by workforce label.
  assumptions: HashMap<String, SurrogateId>,
}

impl Lookups {
  fn load(conn: &Connection) -> Result<Self> {
    Ok(Lookups {
      regions:     key_map(conn, "SELECT code, id FROM dim_region")?,
      years:       key_map(conn, "SELECT year, id FROM dim_year")?,
      diseases:    key_map(conn, "SELECT label, id FROM dim_disease")?,
      workforce:   key_map(conn, "SELECT label, id FROM dim_workforce")?,
      assumptions: key_map(conn, "SELECT workforce_label, id FROM dim_assumption")?,
    })
  }

  fn subject(&self, record: &MasterRecord) -> FactSubject {
    match record.kind {
      RecordKind::Case => FactSubject::Case {
        disease_id: record.disease_label().and_then(|l| self.diseases.get(l).copied()),
      },
      RecordKind::Workforce => {
        let label = record.workforce_label();
        FactSubject::Workforce {
          workforce_id:  label.and_then(|l| self.workforce.get(l).copied()),
          assumption_id: label.and_then(|l| self.assumptions.get(l).copied()),
        }
      }
    }
  }
}

fn key_map<K>(conn: &Connection, sql: &str) -> Result<HashMap<K, SurrogateId>>
where
  K: rusqlite::types::FromSql + Eq + std::hash::Hash,
{
  let mut stmt = conn.prepare(sql)?;
  let map = stmt
    .query_map([], |row| Ok((row.get::<_, K>(0)?, SurrogateId(row.get(1)?))))?
    .collect::<rusqlite::Result<HashMap<_, _>>>()?;
  Ok(map)
}

/// Replace `fact_health` with one row per record in `master`.
///
/// Dimensions must already be loaded. Every fact is stamped with
/// `loaded_at`, so reloading the same input at the same instant writes an
/// identical table.
pub fn load_facts(
  conn:      &Connection,
  master:    &[MasterRecord],
  loaded_at: DateTime<Utc>,
) -> Result<FactLoadReport> {
  conn.execute("DELETE FROM fact_health", [])?;
  reset_sequences(conn, &["fact_health"])?;

  let lookups = Lookups::load(conn)?;
  let created_at = encode_dt(loaded_at);
  let mut unresolved = UnresolvedCounts::default();

  let mut stmt = conn.prepare(
    "INSERT INTO fact_health (
       region_id, year_id, disease_id, workforce_id, assumption_id,
       record_kind, amount, source_file, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
  )?;

  for record in master {
    let region_id = record.region_code.as_deref().and_then(|c| lookups.regions.get(c).copied());
    let year_id = record.year.and_then(|y| lookups.years.get(&y).copied());
    let subject = lookups.subject(record);

    unresolved.region += usize::from(region_id.is_none());
    unresolved.year += usize::from(year_id.is_none());
    match subject {
      FactSubject::Case { disease_id } => {
        unresolved.disease += usize::from(disease_id.is_none());
      }
      FactSubject::Workforce { workforce_id, assumption_id } => {
        unresolved.workforce += usize::from(workforce_id.is_none());
        unresolved.assumption += usize::from(assumption_id.is_none());
      }
    }

    stmt.execute(params![
      encode_id(region_id),
      encode_id(year_id),
      encode_id(subject.disease_id()),
      encode_id(subject.workforce_id()),
      encode_id(subject.assumption_id()),
      record.kind.as_str(),
      record.amount,
      record.source_file,
      created_at,
    ])?;
  }

  if unresolved.required() > 0 {
    tracing::warn!(
      region = unresolved.region,
      year = unresolved.year,
      disease = unresolved.disease,
      workforce = unresolved.workforce,
      "facts written with unresolved dimension keys"
    );
  }
  if unresolved.assumption > 0 {
    tracing::info!(
      facts = unresolved.assumption,
      "workforce facts without a matching assumption"
    );
  }
  tracing::info!(rows = master.len(), "facts loaded");

  Ok(FactLoadReport { rows_written: master.len(), unresolved })
}

/// Every fact, in insertion order.
pub fn read_facts(conn: &Connection) -> Result<Vec<FactRow>> {
  let mut stmt = conn.prepare(
    "SELECT id, region_id, year_id, disease_id, workforce_id, assumption_id,
            record_kind, amount, source_file, created_at
     FROM fact_health ORDER BY id",
  )?;
  let raws = stmt
    .query_map([], |row| {
      Ok(RawFact {
        id:            row.get(0)?,
        region_id:     row.get(1)?,
        year_id:       row.get(2)?,
        disease_id:    row.get(3)?,
        workforce_id:  row.get(4)?,
        assumption_id: row.get(5)?,
        record_kind:   row.get(6)?,
        amount:        row.get(7)?,
        source_file:   row.get(8)?,
        created_at:    row.get(9)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raws.into_iter().map(RawFact::into_fact).collect()
}
