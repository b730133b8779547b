//! Pipeline orchestration: load the warehouse, build the marts, recover from
//! backup. Every public entry point writes exactly one audit row, on success
//! and on failure alike.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kesmas_core::audit::{AuditLogEntry, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Result,
  audit::{AuditLog, RunRecord},
  dimension::{DimensionCounts, load_dimensions},
  drp::{BackupArtifact, BackupManager, RebuildOutcome},
  fact::{FactLoadReport, load_facts},
  mart::{MartReport, build_marts},
  reference,
  schema::reset_schema,
  staging::StagingReader,
  store,
};

/// Process names recorded in `etl_audit_log`.
pub mod process {
  pub const LOAD_WAREHOUSE: &str = "LOAD_WAREHOUSE";
  pub const BUILD_MART: &str = "BUILD_MART";
  pub const DAILY_ETL_WORKFLOW: &str = "DAILY_ETL_WORKFLOW";
  pub const RECOVER_WAREHOUSE: &str = "RECOVER_WAREHOUSE";
  pub const RECOVER_MART: &str = "RECOVER_MART";
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// File locations used by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
  pub case_staging:         PathBuf,
  pub workforce_staging:    PathBuf,
  pub assumption_reference: PathBuf,
  pub warehouse:            PathBuf,
  pub mart:                 PathBuf,
  pub audit:                PathBuf,
  pub backup_dir:           PathBuf,
}

impl PipelineConfig {
  /// The standard layout under a data root:
  ///
  /// ```text
  /// 02_staging/stg_kasus_penyakit.db
  /// 02_staging/stg_tenaga_kesehatan.db
  /// 03_ref_data/indikator_asumsi.csv
  /// 04_data_mart/mart_health_summary.db
  /// 05_core_dw/core_dw_mart.db
  /// 05_core_dw/etl_audit.db
  /// 06_backup/
  /// ```
  pub fn from_data_root(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    Self {
      case_staging:         root.join("02_staging").join("stg_kasus_penyakit.db"),
      workforce_staging:    root.join("02_staging").join("stg_tenaga_kesehatan.db"),
      assumption_reference: root.join("03_ref_data").join("indikator_asumsi.csv"),
      warehouse:            root.join("05_core_dw").join("core_dw_mart.db"),
      mart:                 root.join("04_data_mart").join("mart_health_summary.db"),
      audit:                root.join("05_core_dw").join("etl_audit.db"),
      backup_dir:           root.join("06_backup"),
    }
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
  pub master_rows: usize,
  pub dimensions:  DimensionCounts,
  pub facts:       FactLoadReport,
  pub rebuild:     RebuildOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
  pub load:  LoadReport,
  pub marts: MartReport,
}

/// What a successful run contributes to its audit row.
trait Audited {
  fn rows_loaded(&self) -> u64;
  fn summary(&self) -> String;
}

fn as_rows(n: usize) -> u64 { u64::try_from(n).unwrap_or(u64::MAX) }

impl Audited for LoadReport {
  fn rows_loaded(&self) -> u64 { as_rows(self.master_rows) }

  fn summary(&self) -> String {
    format!(
      "loaded {} facts ({} with unresolved keys)",
      self.facts.rows_written,
      self.facts.unresolved.required()
    )
  }
}

impl Audited for MartReport {
  fn rows_loaded(&self) -> u64 { as_rows(self.total_rows()) }

  fn summary(&self) -> String {
    format!(
      "built marts: {} case, {} workforce, {} ratio rows",
      self.case_rows, self.workforce_rows, self.ratio_rows
    )
  }
}

impl Audited for RunReport {
  fn rows_loaded(&self) -> u64 { self.load.rows_loaded() }

  fn summary(&self) -> String { format!("{}; {}", self.load.summary(), self.marts.summary()) }
}

impl Audited for BackupArtifact {
  fn rows_loaded(&self) -> u64 { 0 }

  fn summary(&self) -> String { format!("restored from {}", self.path.display()) }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Pipeline {
  config:  PipelineConfig,
  backups: BackupManager,
}

impl Pipeline {
  pub fn new(config: PipelineConfig) -> Self {
    let backups = BackupManager::new(&config.backup_dir);
    Self { config, backups }
  }

  pub fn config(&self) -> &PipelineConfig { &self.config }

  /// Rebuild the warehouse from staging, stamping facts with the current
  /// time.
  pub fn load(&self) -> Result<LoadReport> { self.load_at(Utc::now()) }

  /// Rebuild the warehouse from staging, stamping facts with `loaded_at`.
  pub fn load_at(&self, loaded_at: DateTime<Utc>) -> Result<LoadReport> {
    self.audited(process::LOAD_WAREHOUSE, |p| p.load_warehouse(loaded_at))
  }

  /// Rebuild the marts from the current warehouse.
  pub fn build_marts(&self) -> Result<MartReport> {
    self.audited(process::BUILD_MART, |p| p.build_marts_unaudited())
  }

  /// Load the warehouse, then build the marts, as one audited run.
  pub fn run(&self) -> Result<RunReport> {
    self.audited(process::DAILY_ETL_WORKFLOW, |p| {
      let load = p.load_warehouse(Utc::now())?;
      let marts = p.build_marts_unaudited()?;
      Ok(RunReport { load, marts })
    })
  }

  /// Restore the newest warehouse backup.
  pub fn recover_warehouse(&self) -> Result<BackupArtifact> {
    self.audited(process::RECOVER_WAREHOUSE, |p| p.backups.recover(&p.config.warehouse))
  }

  /// Restore the newest mart backup.
  pub fn recover_mart(&self) -> Result<BackupArtifact> {
    self.audited(process::RECOVER_MART, |p| p.backups.recover(&p.config.mart))
  }

  /// Backups of the warehouse (or the mart), newest first.
  pub fn list_backups(&self, mart: bool) -> Result<Vec<BackupArtifact>> {
    let target = if mart { &self.config.mart } else { &self.config.warehouse };
    self.backups.list_backups(target)
  }

  /// The `limit` most recent audit entries (all when `None`), oldest first.
  pub fn audit_log(&self, limit: Option<usize>) -> Result<Vec<AuditLogEntry>> {
    let log = AuditLog::open(&self.config.audit)?;
    match limit {
      Some(n) => log.recent(n),
      None => log.entries(),
    }
  }

  fn load_warehouse(&self, loaded_at: DateTime<Utc>) -> Result<LoadReport> {
    let c = &self.config;

    // Inputs are read in full before the warehouse is touched.
    let master = StagingReader::new(&c.case_staging, &c.workforce_staging).read_master()?;
    let assumptions = reference::read_assumptions(&c.assumption_reference)?;
    if assumptions.is_none() {
      tracing::warn!(
        path = %c.assumption_reference.display(),
        "assumption reference not found"
      );
    }

    let rebuild = self.backups.prepare_rebuild(&c.warehouse)?;

    let mut conn = store::open(&c.warehouse)?;
    let tx = conn.transaction()?;
    reset_schema(&tx)?;
    let dimensions = load_dimensions(&tx, &master, assumptions.as_deref())?;
    let facts = load_facts(&tx, &master, loaded_at)?;
    tx.commit()?;

    Ok(LoadReport { master_rows: master.len(), dimensions, facts, rebuild })
  }

  fn build_marts_unaudited(&self) -> Result<MartReport> {
    build_marts(&self.config.warehouse, &self.config.mart, &self.backups)
  }

  /// Run `f` inside a tracing span and record its outcome.
  ///
  /// If the audit row cannot be written, the run's own error wins; a
  /// successful run fails with the audit error instead.
  fn audited<T, F>(&self, process_name: &str, f: F) -> Result<T>
  where
    T: Audited,
    F: FnOnce(&Self) -> Result<T>,
  {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", process = process_name, %run_id);
    let _guard = span.enter();

    let started_at = Utc::now();
    tracing::info!("run started");
    let result = f(self);
    let finished_at = Utc::now();

    let (status, message, rows_loaded) = match &result {
      Ok(outcome) => (RunStatus::Success, outcome.summary(), outcome.rows_loaded()),
      Err(e) => {
        tracing::error!(error = %e, "run failed");
        (RunStatus::Failed, e.to_string(), 0)
      }
    };

    let record = RunRecord {
      process_name,
      status,
      message: Some(message),
      started_at,
      finished_at,
      rows_loaded,
    };
    let audit = AuditLog::open(&self.config.audit).and_then(|log| log.record(&record));

    match (result, audit) {
      (result, Ok(_)) => {
        tracing::info!(status = %status, duration_sec = record.duration_sec(), "run finished");
        result
      }
      (Err(e), Err(audit_err)) => {
        tracing::error!(error = %audit_err, "failed to write audit row");
        Err(e)
      }
      (Ok(_), Err(audit_err)) => {
        tracing::error!(error = %audit_err, "failed to write audit row");
        Err(audit_err)
      }
    }
  }
}
