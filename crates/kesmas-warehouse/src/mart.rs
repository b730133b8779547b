//! MartBuilder: rolls the warehouse up into the three mart tables.
//!
//! Aggregates are computed from a read-only warehouse connection before the
//! mart file is touched. The mart file then goes through the same
//! backup-before-delete step as the warehouse and is rewritten in one
//! transaction.

use std::path::Path;

use kesmas_core::{
  fact::SurrogateId,
  mart::{CaseSummary, WorkforceSummary, WorkloadRatio},
};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::{
  Error, Result,
  drp::{BackupManager, RebuildOutcome},
  schema::{reset_mart_schema, table_exists},
  store,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MartReport {
  pub case_rows:      usize,
  pub workforce_rows: usize,
  pub ratio_rows:     usize,
  pub rebuild:        RebuildOutcome,
}

impl MartReport {
  pub fn total_rows(&self) -> usize { self.case_rows + self.workforce_rows + self.ratio_rows }
}

/// Rebuild the marts at `mart` from the warehouse at `warehouse`.
///
/// Fails with [`Error::WarehouseMissing`] before touching `mart` when the
/// warehouse file or its fact table does not exist.
pub fn build_marts(warehouse: &Path, mart: &Path, backups: &BackupManager) -> Result<MartReport> {
  if !warehouse.exists() {
    return Err(Error::WarehouseMissing(warehouse.to_path_buf()));
  }

  let (cases, workforce, ratios) = {
    let src = store::open_read_only(warehouse)?;
    if !table_exists(&src, "fact_health")? {
      return Err(Error::WarehouseMissing(warehouse.to_path_buf()));
    }
    (case_summary(&src)?, workforce_summary(&src)?, workload_ratio(&src)?)
  };
  if ratios.is_empty() {
    tracing::warn!("no fact rows with a resolved year and region; workload ratio mart is empty");
  }

  let rebuild = backups.prepare_rebuild(mart)?;

  let mut conn = store::open(mart)?;
  let tx = conn.transaction()?;
  reset_mart_schema(&tx)?;
  write_case_summary(&tx, &cases)?;
  write_workforce_summary(&tx, &workforce)?;
  write_workload_ratio(&tx, &ratios)?;
  tx.commit()?;

  tracing::info!(
    case_rows = cases.len(),
    workforce_rows = workforce.len(),
    ratio_rows = ratios.len(),
    "marts built"
  );
  Ok(MartReport {
    case_rows: cases.len(),
    workforce_rows: workforce.len(),
    ratio_rows: ratios.len(),
    rebuild,
  })
}

// ─── Aggregation queries ─────────────────────────────────────────────────────

/// Case totals per year, region and disease. Facts with an unresolved key
/// drop out of the inner joins.
pub fn case_summary(warehouse: &Connection) -> Result<Vec<CaseSummary>> {
  let mut stmt = warehouse.prepare(
    "SELECT y.year, r.name, d.label, SUM(f.amount)
     FROM fact_health f
     JOIN dim_year    y ON y.id = f.year_id
     JOIN dim_region  r ON r.id = f.region_id
     JOIN dim_disease d ON d.id = f.disease_id
     WHERE f.record_kind = 'case'
     GROUP BY y.year, r.id, d.id
     ORDER BY y.year, r.id, d.id",
  )?;
  let rows = stmt
    .query_map([], |row| {
      Ok(CaseSummary {
        year:          row.get(0)?,
        region_name:   row.get(1)?,
        disease_label: row.get(2)?,
        total_cases:   row.get(3)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Workforce totals per year, region and role, keyed by surrogate id.
pub fn workforce_summary(warehouse: &Connection) -> Result<Vec<WorkforceSummary>> {
  let mut stmt = warehouse.prepare(
    "SELECT f.year_id, f.region_id, f.workforce_id, w.label, SUM(f.amount)
     FROM fact_health f
     JOIN dim_workforce w ON w.id = f.workforce_id
     WHERE f.record_kind = 'workforce'
       AND f.year_id IS NOT NULL
       AND f.region_id IS NOT NULL
     GROUP BY f.year_id, f.region_id, f.workforce_id
     ORDER BY f.year_id, f.region_id, f.workforce_id",
  )?;
  let rows = stmt
    .query_map([], |row| {
      Ok(WorkforceSummary {
        year_id:         SurrogateId(row.get(0)?),
        region_id:       SurrogateId(row.get(1)?),
        workforce_id:    SurrogateId(row.get(2)?),
        workforce_label: row.get(3)?,
        total_workforce: row.get(4)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Cases per worker for every year and region with at least one resolved
/// fact. Assumption rows are not required.
pub fn workload_ratio(warehouse: &Connection) -> Result<Vec<WorkloadRatio>> {
  let mut stmt = warehouse.prepare(
    "SELECT y.year, r.name,
            TOTAL(CASE WHEN f.record_kind = 'workforce' THEN f.amount END),
            TOTAL(CASE WHEN f.record_kind = 'case'      THEN f.amount END)
     FROM fact_health f
     JOIN dim_year   y ON y.id = f.year_id
     JOIN dim_region r ON r.id = f.region_id
     GROUP BY y.year, r.id
     ORDER BY y.year, r.id",
  )?;
  let rows = stmt
    .query_map([], |row| {
      Ok(WorkloadRatio::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

// ─── Writes ──────────────────────────────────────────────────────────────────

fn write_case_summary(conn: &Connection, rows: &[CaseSummary]) -> Result<()> {
  let mut stmt = conn.prepare(
    "INSERT INTO mart_annual_case_summary (year, region_name, disease_label, total_cases)
     VALUES (?1, ?2, ?3, ?4)",
  )?;
  for r in rows {
    stmt.execute(params![r.year, r.region_name, r.disease_label, r.total_cases])?;
  }
  Ok(())
}

fn write_workforce_summary(conn: &Connection, rows: &[WorkforceSummary]) -> Result<()> {
  let mut stmt = conn.prepare(
    "INSERT INTO mart_annual_workforce_summary
       (year_id, region_id, workforce_id, workforce_label, total_workforce)
     VALUES (?1, ?2, ?3, ?4, ?5)",
  )?;
  for r in rows {
    stmt.execute(params![
      r.year_id.0,
      r.region_id.0,
      r.workforce_id.0,
      r.workforce_label,
      r.total_workforce,
    ])?;
  }
  Ok(())
}

fn write_workload_ratio(conn: &Connection, rows: &[WorkloadRatio]) -> Result<()> {
  let mut stmt = conn.prepare(
    "INSERT INTO mart_workload_ratio
       (year, region_name, total_workforce, total_cases, workforce_ratio)
     VALUES (?1, ?2, ?3, ?4, ?5)",
  )?;
  for r in rows {
    stmt.execute(params![
      r.year,
      r.region_name,
      r.total_workforce,
      r.total_cases,
      r.workforce_ratio,
    ])?;
  }
  Ok(())
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Read `mart_workload_ratio` back from a built mart.
pub fn read_workload_ratio(mart: &Connection) -> Result<Vec<WorkloadRatio>> {
  let mut stmt = mart.prepare(
    "SELECT year, region_name, total_workforce, total_cases, workforce_ratio
     FROM mart_workload_ratio ORDER BY rowid",
  )?;
  let rows = stmt
    .query_map([], |row| {
      Ok(WorkloadRatio {
        year:            row.get(0)?,
        region_name:     row.get(1)?,
        total_workforce: row.get(2)?,
        total_cases:     row.get(3)?,
        workforce_ratio: row.get(4)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Read `mart_annual_case_summary` back from a built mart.
pub fn read_case_summary(mart: &Connection) -> Result<Vec<CaseSummary>> {
  let mut stmt = mart.prepare(
    "SELECT year, region_name, disease_label, total_cases
     FROM mart_annual_case_summary ORDER BY rowid",
  )?;
  let rows = stmt
    .query_map([], |row| {
      Ok(CaseSummary {
        year:          row.get(0)?,
        region_name:   row.get(1)?,
        disease_label: row.get(2)?,
        total_cases:   row.get(3)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
