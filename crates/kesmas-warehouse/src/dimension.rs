//! DimensionLoader: derives the five dimension tables of a run and assigns
//! their surrogate keys.

use std::{collections::HashSet, hash::Hash};

use kesmas_core::{
  dimension::{
    Assumption, AssumptionDim, AssumptionInput, DiseaseDim, RegionDim, WorkforceDim, YearDim,
    dedup_assumptions,
  },
  fact::SurrogateId,
  record::{MasterRecord, RecordKind},
};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::{Result, schema::reset_sequences};

const DIMENSION_TABLES: &[&str] =
  &["dim_region", "dim_year", "dim_disease", "dim_workforce", "dim_assumption"];

/// Rows written per dimension by [`load_dimensions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionCounts {
  pub regions:     usize,
  pub years:       usize,
  pub diseases:    usize,
  pub workforce:   usize,
  /// `None` when the assumption reference was absent and the dimension was
  /// skipped.
  pub assumptions: Option<usize>,
}

/// Replace every dimension table with values derived from `master` and
/// `assumptions`.
///
/// Existing facts are cleared first: their keys refer to the ids being
/// replaced. Ids restart at 1 and follow first-occurrence order in `master`,
/// so identical input always yields identical ids.
pub fn load_dimensions(
  conn:        &Connection,
  master:      &[MasterRecord],
  assumptions: Option<&[AssumptionInput]>,
) -> Result<DimensionCounts> {
  conn.execute("DELETE FROM fact_health", [])?;
  for table in DIMENSION_TABLES {
    conn.execute(&format!("DELETE FROM {table}"), [])?;
  }
  reset_sequences(conn, DIMENSION_TABLES)?;
  reset_sequences(conn, &["fact_health"])?;

  let mut counts = DimensionCounts::default();

  // Region: one row per code; the first name seen wins.
  let regions = first_occurrences(master.iter().filter_map(|r| {
    r.region_code.as_deref().map(|code| (code, r.region_name.as_deref()))
  }));
  {
    let mut stmt = conn.prepare("INSERT INTO dim_region (code, name) VALUES (?1, ?2)")?;
    for (code, name) in &regions {
      stmt.execute(params![code, name])?;
    }
  }
  counts.regions = regions.len();

  let years = first_occurrences(master.iter().filter_map(|r| r.year.map(|y| (y, ()))));
  {
    let mut stmt = conn.prepare("INSERT INTO dim_year (year) VALUES (?1)")?;
    for (year, ()) in &years {
      stmt.execute([year])?;
    }
  }
  counts.years = years.len();

  counts.diseases = insert_labels(
    conn,
    "dim_disease",
    RecordKind::Case,
    master.iter().filter_map(MasterRecord::disease_label),
  )?;
  counts.workforce = insert_labels(
    conn,
    "dim_workforce",
    RecordKind::Workforce,
    master.iter().filter_map(MasterRecord::workforce_label),
  )?;

  counts.assumptions = match assumptions {
    Some(inputs) => Some(insert_assumptions(conn, &dedup_assumptions(inputs))?),
    None => {
      tracing::warn!("assumption reference absent; dim_assumption left empty");
      None
    }
  };

  tracing::info!(
    regions = counts.regions,
    years = counts.years,
    diseases = counts.diseases,
    workforce = counts.workforce,
    assumptions = ?counts.assumptions,
    "dimensions loaded"
  );
  Ok(counts)
}

/// Distinct keys in first-occurrence order, each with the value it first
/// appeared with.
fn first_occurrences<K, V>(pairs: impl Iterator<Item = (K, V)>) -> Vec<(K, V)>
where
  K: Eq + Hash + Clone,
{
  let mut seen = HashSet::new();
  pairs.filter(|(k, _)| seen.insert(k.clone())).collect()
}

fn insert_labels<'a>(
  conn:   &Connection,
  table:  &str,
  kind:   RecordKind,
  labels: impl Iterator<Item = &'a str>,
) -> Result<usize> {
  let labels = first_occurrences(labels.map(|l| (l, ())));
  let mut stmt = conn.prepare(&format!("INSERT INTO {table} (kind, label) VALUES (?1, ?2)"))?;
  for (label, ()) in &labels {
    stmt.execute(params![kind.as_str(), label])?;
  }
  Ok(labels.len())
}

fn insert_assumptions(conn: &Connection, rows: &[Assumption]) -> Result<usize> {
  let mut stmt = conn.prepare(
    "INSERT INTO dim_assumption (
       workforce_label, weekly_workdays, daily_hours, per_patient_hours,
       weekly_hours, yearly_hours, yearly_workdays, daily_capacity,
       ideal_ratio, source_reference
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
  )?;
  for a in rows {
    stmt.execute(params![
      a.workforce_label,
      a.weekly_workdays,
      a.daily_hours,
      a.per_patient_hours,
      a.weekly_hours,
      a.yearly_hours,
      a.yearly_workdays,
      a.daily_capacity,
      a.ideal_ratio,
      a.source_reference,
    ])?;
  }
  Ok(rows.len())
}

// ─── Reads ───────────────────────────────────────────────────────────────────

pub fn read_regions(conn: &Connection) -> Result<Vec<RegionDim>> {
  let mut stmt = conn.prepare("SELECT id, code, name FROM dim_region ORDER BY id")?;
  let rows = stmt
    .query_map([], |row| {
      Ok(RegionDim {
        id:   SurrogateId(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

pub fn read_years(conn: &Connection) -> Result<Vec<YearDim>> {
  let mut stmt = conn.prepare("SELECT id, year FROM dim_year ORDER BY id")?;
  let rows = stmt
    .query_map([], |row| Ok(YearDim { id: SurrogateId(row.get(0)?), year: row.get(1)? }))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

pub fn read_diseases(conn: &Connection) -> Result<Vec<DiseaseDim>> {
  read_labels(conn, "dim_disease")?
    .into_iter()
    .map(|(id, kind, label)| -> Result<DiseaseDim> {
      Ok(DiseaseDim { id, kind: RecordKind::parse(&kind)?, label })
    })
    .collect()
}

pub fn read_workforce(conn: &Connection) -> Result<Vec<WorkforceDim>> {
  read_labels(conn, "dim_workforce")?
    .into_iter()
    .map(|(id, kind, label)| -> Result<WorkforceDim> {
      Ok(WorkforceDim { id, kind: RecordKind::parse(&kind)?, label })
    })
    .collect()
}

fn read_labels(conn: &Connection, table: &str) -> Result<Vec<(SurrogateId, String, String)>> {
  let mut stmt = conn.prepare(&format!("SELECT id, kind, label FROM {table} ORDER BY id"))?;
  let rows = stmt
    .query_map([], |row| Ok((SurrogateId(row.get(0)?), row.get(1)?, row.get(2)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

pub fn read_assumptions(conn: &Connection) -> Result<Vec<AssumptionDim>> {
  let mut stmt = conn.prepare(
    "SELECT id, workforce_label, weekly_workdays, daily_hours, per_patient_hours,
            weekly_hours, yearly_hours, yearly_workdays, daily_capacity,
            ideal_ratio, source_reference
     FROM dim_assumption ORDER BY id",
  )?;
  let rows = stmt
    .query_map([], |row| {
      Ok(AssumptionDim {
        id:         SurrogateId(row.get(0)?),
        assumption: Assumption {
          workforce_label:   row.get(1)?,
          weekly_workdays:   row.get(2)?,
          daily_hours:       row.get(3)?,
          per_patient_hours: row.get(4)?,
          weekly_hours:      row.get(5)?,
          yearly_hours:      row.get(6)?,
          yearly_workdays:   row.get(7)?,
          daily_capacity:    row.get(8)?,
          ideal_ratio:       row.get(9)?,
          source_reference:  row.get(10)?,
        },
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
