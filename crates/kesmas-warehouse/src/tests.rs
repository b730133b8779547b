//! Integration tests for the pipeline against on-disk SQLite files in a
//! temporary data root.

use std::{
  fs,
  path::Path,
  time::{Duration, SystemTime},
};

use chrono::{DateTime, TimeZone, Utc};
use kesmas_core::{
  audit::RunStatus,
  fact::{FactSubject, SurrogateId},
  mart::WorkloadRatio,
  record::RecordKind,
};
use rusqlite::Connection;
use tempfile::TempDir;

use crate::{
  Error, Pipeline, PipelineConfig, RebuildOutcome,
  dimension::{read_assumptions, read_diseases, read_regions, read_workforce, read_years},
  fact::read_facts,
  mart::{read_case_summary, read_workload_ratio},
  pipeline::process,
  store,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// One staging row: code, name, year, label, cleaned value.
type StagingRow<'a> = (Option<&'a str>, &'a str, Option<i64>, &'a str, f64);

const REFERENCE: &str = "\
role_label,weekly_workdays,daily_hours,per_patient_hours,source_reference
Dokter,5,8,\"0,25\",Permenkes 43/2019
Bidan,6,7,,
";

struct Fixture {
  _dir:   TempDir,
  config: PipelineConfig,
}

impl Fixture {
  fn new() -> Self {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = PipelineConfig::from_data_root(dir.path());
    Self { _dir: dir, config }
  }

  fn pipeline(&self) -> Pipeline { Pipeline::new(self.config.clone()) }

  fn cases(&self, rows: &[StagingRow<'_>]) { write_staging(&self.config.case_staging, rows); }

  fn workforce(&self, rows: &[StagingRow<'_>]) {
    write_staging(&self.config.workforce_staging, rows);
  }

  fn reference(&self, contents: &str) {
    let path = &self.config.assumption_reference;
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
  }

  /// One case row and one workforce row for Banjar, 2024.
  fn banjar(&self) {
    self.cases(&[(Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0)]);
    self.workforce(&[(Some("6303"), "Banjar", Some(2024), "Dokter", 15.0)]);
    self.reference(REFERENCE);
  }

  fn warehouse(&self) -> Connection { store::open_read_only(&self.config.warehouse).unwrap() }

  fn mart(&self) -> Connection { store::open_read_only(&self.config.mart).unwrap() }
}

fn write_staging(path: &Path, rows: &[StagingRow<'_>]) {
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  let table = path.file_stem().unwrap().to_str().unwrap();
  let conn = Connection::open(path).unwrap();
  conn
    .execute_batch(&format!(
      "DROP TABLE IF EXISTS {table};
       CREATE TABLE {table} (
         region_code TEXT, region_name TEXT, year INTEGER, category_label TEXT,
         raw_value TEXT, cleaned_numeric_value REAL, source_file TEXT
       );"
    ))
    .unwrap();
  for (code, name, year, label, value) in rows {
    conn
      .execute(
        &format!(
          "INSERT INTO {table} (region_code, region_name, year, category_label,
                                raw_value, cleaned_numeric_value, source_file)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'bps_kalsel.csv')"
        ),
        rusqlite::params![code, name, year, label, value.to_string(), value],
      )
      .unwrap();
  }
}

fn loaded_at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() }

// ─── Load ────────────────────────────────────────────────────────────────────

#[test]
fn banjar_scenario_loads_star_schema() {
  let fx = Fixture::new();
  fx.banjar();

  let report = fx.pipeline().load_at(loaded_at()).unwrap();
  assert_eq!(report.master_rows, 2);
  assert_eq!(report.facts.rows_written, 2);
  assert_eq!(report.facts.unresolved.required(), 0);
  assert_eq!(report.rebuild, RebuildOutcome::Fresh);

  let conn = fx.warehouse();
  let regions = read_regions(&conn).unwrap();
  assert_eq!(regions.len(), 1);
  assert_eq!(regions[0].code, "6303");
  assert_eq!(regions[0].name.as_deref(), Some("Banjar"));

  let years = read_years(&conn).unwrap();
  assert_eq!(years.len(), 1);
  assert_eq!(years[0].year, 2024);

  let diseases = read_diseases(&conn).unwrap();
  assert_eq!(diseases[0].label, "TB Paru");
  assert_eq!(diseases[0].kind, RecordKind::Case);
  let workforce = read_workforce(&conn).unwrap();
  assert_eq!(workforce[0].label, "Dokter");

  let facts = read_facts(&conn).unwrap();
  assert_eq!(facts.len(), 2);
  assert_eq!(facts[0].subject, FactSubject::Case { disease_id: Some(diseases[0].id) });
  assert_eq!(facts[0].amount, 120.0);
  assert_eq!(facts[1].subject.workforce_id(), Some(workforce[0].id));
  assert_eq!(facts[1].subject.disease_id(), None);
  assert!(facts[1].subject.assumption_id().is_some());
  assert_eq!(facts[1].amount, 15.0);
  assert!(facts.iter().all(|f| f.created_at == loaded_at()));
}

#[test]
fn assumptions_fill_defaults() {
  let fx = Fixture::new();
  fx.banjar();
  fx.pipeline().load_at(loaded_at()).unwrap();

  let assumptions = read_assumptions(&fx.warehouse()).unwrap();
  assert_eq!(assumptions.len(), 2);

  let dokter = &assumptions[0].assumption;
  assert_eq!(dokter.workforce_label, "Dokter");
  assert_eq!(dokter.per_patient_hours, 0.25);
  assert_eq!(dokter.daily_capacity, 32.0);

  let bidan = &assumptions[1].assumption;
  assert_eq!(bidan.per_patient_hours, 0.25);
  assert_eq!(bidan.weekly_hours, 42);
  assert_eq!(bidan.yearly_hours, 42 * 52);
  assert_eq!(bidan.yearly_workdays, 6 * 52);
  assert_eq!(bidan.daily_capacity, 28.0);
}

#[test]
fn reload_is_idempotent() {
  let fx = Fixture::new();
  fx.cases(&[
    (Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0),
    (Some("6371"), "Banjarmasin", Some(2023), "DBD", 40.0),
    (Some("6303"), "Banjar", Some(2023), "DBD", 7.0),
  ]);
  fx.workforce(&[
    (Some("6371"), "Banjarmasin", Some(2023), "Bidan", 60.0),
    (Some("6303"), "Banjar", Some(2024), "Dokter", 15.0),
  ]);
  fx.reference(REFERENCE);

  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();
  let snapshot = |conn: &Connection| {
    (
      read_regions(conn).unwrap(),
      read_years(conn).unwrap(),
      read_diseases(conn).unwrap(),
      read_workforce(conn).unwrap(),
      read_assumptions(conn).unwrap(),
      read_facts(conn).unwrap(),
    )
  };
  let first = snapshot(&fx.warehouse());

  let second_report = pipeline.load_at(loaded_at()).unwrap();
  assert!(matches!(second_report.rebuild, RebuildOutcome::BackedUp(_)));
  let second = snapshot(&fx.warehouse());

  assert_eq!(first, second);
  assert_eq!(first.0[0].id, SurrogateId(1));
}

#[test]
fn fact_keys_follow_record_kind() {
  let fx = Fixture::new();
  fx.cases(&[
    (Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0),
    (Some("6303"), "Banjar", Some(2024), "Malaria", 3.0),
  ]);
  fx.workforce(&[
    (Some("6303"), "Banjar", Some(2024), "Dokter", 15.0),
    (Some("6303"), "Banjar", Some(2024), "Perawat", 40.0),
  ]);
  fx.reference(REFERENCE);
  fx.pipeline().load_at(loaded_at()).unwrap();

  let facts = read_facts(&fx.warehouse()).unwrap();
  assert_eq!(facts.len(), 4);
  for fact in &facts {
    assert!(fact.region_id.is_some() && fact.year_id.is_some());
    match fact.kind() {
      RecordKind::Case => {
        assert!(fact.subject.disease_id().is_some());
        assert!(fact.subject.workforce_id().is_none());
      }
      RecordKind::Workforce => {
        assert!(fact.subject.workforce_id().is_some());
        assert!(fact.subject.disease_id().is_none());
      }
    }
  }
  // Perawat has no reference row.
  assert_eq!(facts[3].subject.assumption_id(), None);
}

#[test]
fn unresolved_keys_keep_the_row() {
  let fx = Fixture::new();
  fx.cases(&[
    (Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0),
    (Some("6303"), "Banjar", None, "TB Paru", 5.0),
    (None, "Tanpa Kode", Some(2024), "TB Paru", 2.0),
  ]);
  fx.workforce(&[(Some("6303"), "Banjar", Some(2024), "Dokter", 15.0)]);

  let report = fx.pipeline().load_at(loaded_at()).unwrap();
  assert_eq!(report.facts.rows_written, 4);
  assert_eq!(report.facts.unresolved.year, 1);
  assert_eq!(report.facts.unresolved.region, 1);

  let facts = read_facts(&fx.warehouse()).unwrap();
  assert_eq!(facts.len(), 4);
  assert!(!facts[1].is_fully_resolved());
  assert_eq!(facts[1].year_id, None);
  assert_eq!(facts[2].region_id, None);
}

#[test]
fn province_rows_are_dropped() {
  let fx = Fixture::new();
  fx.cases(&[
    (Some("6300000"), "Kalimantan Selatan", Some(2024), "TB Paru", 900.0),
    (Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0),
  ]);

  let report = fx.pipeline().load_at(loaded_at()).unwrap();
  assert_eq!(report.master_rows, 1);
  assert_eq!(read_regions(&fx.warehouse()).unwrap().len(), 1);
}

#[test]
fn missing_reference_leaves_assumptions_empty() {
  let fx = Fixture::new();
  fx.cases(&[(Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0)]);
  fx.workforce(&[(Some("6303"), "Banjar", Some(2024), "Dokter", 15.0)]);

  let report = fx.pipeline().load_at(loaded_at()).unwrap();
  assert_eq!(report.dimensions.assumptions, None);

  let conn = fx.warehouse();
  assert!(read_assumptions(&conn).unwrap().is_empty());
  let facts = read_facts(&conn).unwrap();
  assert_eq!(facts[1].subject.assumption_id(), None);
  assert!(facts[1].is_fully_resolved());
}

#[test]
fn empty_staging_fails_before_mutation() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();
  let before = fs::read(&fx.config.warehouse).unwrap();

  fx.cases(&[]);
  fx.workforce(&[]);
  let err = pipeline.load_at(loaded_at()).unwrap_err();
  assert!(matches!(err, Error::StagingEmpty));

  assert_eq!(fs::read(&fx.config.warehouse).unwrap(), before);
  assert!(pipeline.list_backups(false).unwrap().is_empty());

  let log = pipeline.audit_log(None).unwrap();
  assert_eq!(log.len(), 2);
  assert_eq!(log[1].status, RunStatus::Failed);
  assert_eq!(log[1].process_name, process::LOAD_WAREHOUSE);
  assert_eq!(log[1].rows_loaded, 0);
  assert!(log[1].message.as_deref().unwrap_or_default().contains("empty"));
}

#[test]
fn missing_staging_files_fail() {
  let fx = Fixture::new();
  let err = fx.pipeline().load_at(loaded_at()).unwrap_err();
  assert!(matches!(err, Error::StagingEmpty));
  assert!(!fx.config.warehouse.exists());
}

// ─── Backup & recovery ───────────────────────────────────────────────────────

#[test]
fn reload_backs_up_previous_warehouse() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();
  let before = fs::read(&fx.config.warehouse).unwrap();

  let report = pipeline.load().unwrap();
  let artifact = report.rebuild.artifact().expect("backup taken").clone();
  assert_eq!(fs::read(&artifact.path).unwrap(), before);

  let backups = pipeline.list_backups(false).unwrap();
  assert_eq!(backups.len(), 1);
  assert_eq!(backups[0].path, artifact.path);
}

#[test]
fn recover_restores_newest_of_three() {
  let fx = Fixture::new();
  let backup_dir = &fx.config.backup_dir;
  fs::create_dir_all(backup_dir).unwrap();
  let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
  for (i, name) in [
    "core_dw_mart_20240101_010000_backup.db",
    "core_dw_mart_20240102_010000_backup.db",
    "core_dw_mart_20240103_010000_backup.db",
  ]
  .into_iter()
  .enumerate()
  {
    let path = backup_dir.join(name);
    fs::write(&path, format!("backup {i}")).unwrap();
    let f = fs::File::options().write(true).open(&path).unwrap();
    f.set_modified(base + Duration::from_secs(60 * i as u64)).unwrap();
  }
  // Another stem in the same directory is never a candidate.
  fs::write(backup_dir.join("mart_health_summary_20250101_000000_backup.db"), "mart").unwrap();

  let pipeline = fx.pipeline();
  let restored = pipeline.recover_warehouse().unwrap();
  assert!(restored.path.ends_with("core_dw_mart_20240103_010000_backup.db"));
  assert_eq!(fs::read_to_string(&fx.config.warehouse).unwrap(), "backup 2");

  let log = pipeline.audit_log(None).unwrap();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].process_name, process::RECOVER_WAREHOUSE);
  assert_eq!(log[0].status, RunStatus::Success);
}

#[test]
fn recover_without_backup_fails_loudly() {
  let fx = Fixture::new();
  let pipeline = fx.pipeline();
  let err = pipeline.recover_warehouse().unwrap_err();
  assert!(matches!(err, Error::NoBackup { .. }));
  assert!(!fx.config.warehouse.exists());

  let log = pipeline.audit_log(None).unwrap();
  assert_eq!(log[0].status, RunStatus::Failed);
}

#[test]
fn externally_deleted_warehouse_recovers_newer_backup() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();

  fx.cases(&[(Some("6303"), "Banjar", Some(2024), "TB Paru", 130.0)]);
  pipeline.load_at(loaded_at()).unwrap();
  let newer = fs::read(&fx.config.warehouse).unwrap();

  fx.cases(&[(Some("6303"), "Banjar", Some(2024), "TB Paru", 140.0)]);
  pipeline.load_at(loaded_at()).unwrap();
  assert_eq!(pipeline.list_backups(false).unwrap().len(), 2);

  fs::remove_file(&fx.config.warehouse).unwrap();
  pipeline.recover_warehouse().unwrap();
  assert_eq!(fs::read(&fx.config.warehouse).unwrap(), newer);

  let facts = read_facts(&fx.warehouse()).unwrap();
  assert_eq!(facts[0].amount, 130.0);
}

#[test]
fn unusable_backup_dir_rebuilds_in_place() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  assert_eq!(pipeline.load_at(loaded_at()).unwrap().rebuild, RebuildOutcome::Fresh);

  // A plain file where the backup directory should be.
  fs::write(&fx.config.backup_dir, "not a directory").unwrap();
  fx.cases(&[(Some("6303"), "Banjar", Some(2024), "TB Paru", 999.0)]);

  let report = pipeline.load_at(loaded_at()).unwrap();
  assert!(matches!(report.rebuild, RebuildOutcome::BackupSkipped { .. }));
  assert!(report.rebuild.artifact().is_none());

  let facts = read_facts(&fx.warehouse()).unwrap();
  assert_eq!(facts.len(), 2);
  assert_eq!(facts[0].amount, 999.0);
  assert_eq!(fs::read_to_string(&fx.config.backup_dir).unwrap(), "not a directory");

  let log = pipeline.audit_log(None).unwrap();
  assert_eq!(log.len(), 2);
  assert_eq!(log[1].process_name, process::LOAD_WAREHOUSE);
  assert_eq!(log[1].status, RunStatus::Success);
}

#[test]
fn torn_backup_is_never_restored() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();
  let good = fs::read(&fx.config.warehouse).unwrap();
  pipeline.load_at(loaded_at()).unwrap();

  // What an interrupted copy leaves behind: a newer, truncated fragment.
  let fragment = fx.config.backup_dir.join(".core_dw_mart_20991231_235959_backup.db.partial");
  fs::write(&fragment, &good[..good.len() / 2]).unwrap();

  let backups = pipeline.list_backups(false).unwrap();
  assert_eq!(backups.len(), 1);
  assert_ne!(backups[0].path, fragment);

  fs::remove_file(&fx.config.warehouse).unwrap();
  pipeline.recover_warehouse().unwrap();
  assert_eq!(fs::read(&fx.config.warehouse).unwrap(), good);

  let check: String =
    fx.warehouse().query_row("PRAGMA integrity_check", [], |row| row.get(0)).unwrap();
  assert_eq!(check, "ok");
  assert!(!fx.config.warehouse.with_file_name(".core_dw_mart.db.recovering").exists());
}

#[test]
fn locked_warehouse_is_not_deleted() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();

  let holder = Connection::open(&fx.config.warehouse).unwrap();
  holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

  let err = pipeline.load_at(loaded_at()).unwrap_err();
  assert!(matches!(err, Error::WarehouseLocked(_)));
  assert!(fx.config.warehouse.exists());

  holder.execute_batch("ROLLBACK;").unwrap();
  drop(holder);
  assert_eq!(read_facts(&fx.warehouse()).unwrap().len(), 2);
}

// ─── Marts ───────────────────────────────────────────────────────────────────

#[test]
fn banjar_scenario_builds_marts() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();

  let report = pipeline.run().unwrap();
  assert_eq!(report.load.master_rows, 2);
  assert_eq!(report.marts.case_rows, 1);
  assert_eq!(report.marts.workforce_rows, 1);
  assert_eq!(report.marts.ratio_rows, 1);

  let mart = fx.mart();
  assert_eq!(read_workload_ratio(&mart).unwrap(), vec![WorkloadRatio {
    year:            2024,
    region_name:     Some("Banjar".into()),
    total_workforce: 15.0,
    total_cases:     120.0,
    workforce_ratio: 8.0,
  }]);
  let cases = read_case_summary(&mart).unwrap();
  assert_eq!(cases[0].disease_label, "TB Paru");
  assert_eq!(cases[0].total_cases, 120.0);

  let log = pipeline.audit_log(None).unwrap();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].process_name, process::DAILY_ETL_WORKFLOW);
  assert_eq!(log[0].rows_loaded, 2);
}

#[test]
fn ratio_is_zero_without_workforce() {
  let fx = Fixture::new();
  fx.cases(&[(Some("6303"), "Banjar", Some(2024), "TB Paru", 120.0)]);
  let pipeline = fx.pipeline();
  pipeline.load_at(loaded_at()).unwrap();
  pipeline.build_marts().unwrap();

  let ratios = read_workload_ratio(&fx.mart()).unwrap();
  assert_eq!(ratios.len(), 1);
  assert_eq!(ratios[0].total_workforce, 0.0);
  assert_eq!(ratios[0].workforce_ratio, 0.0);
}

#[test]
fn marts_require_a_warehouse() {
  let fx = Fixture::new();
  let pipeline = fx.pipeline();
  let err = pipeline.build_marts().unwrap_err();
  assert!(matches!(err, Error::WarehouseMissing(_)));
  assert!(!fx.config.mart.exists());

  let log = pipeline.audit_log(None).unwrap();
  assert_eq!(log[0].process_name, process::BUILD_MART);
  assert_eq!(log[0].status, RunStatus::Failed);
}

#[test]
fn rebuilding_marts_backs_up_the_previous_mart() {
  let fx = Fixture::new();
  fx.banjar();
  let pipeline = fx.pipeline();
  pipeline.run().unwrap();
  let before = fs::read(&fx.config.mart).unwrap();

  let report = pipeline.build_marts().unwrap();
  let artifact = report.rebuild.artifact().expect("mart backup taken");
  assert_eq!(fs::read(&artifact.path).unwrap(), before);
  assert_eq!(pipeline.list_backups(true).unwrap().len(), 1);

  fs::remove_file(&fx.config.mart).unwrap();
  pipeline.recover_mart().unwrap();
  assert_eq!(fs::read(&fx.config.mart).unwrap(), before);
}

// ─── Audit ───────────────────────────────────────────────────────────────────

#[test]
fn every_invocation_appends_one_audit_row() {
  let fx = Fixture::new();
  let pipeline = fx.pipeline();
  let _ = pipeline.load();
  fx.banjar();
  pipeline.load().unwrap();
  pipeline.build_marts().unwrap();
  let _ = pipeline.recover_mart();

  let log = pipeline.audit_log(None).unwrap();
  let statuses: Vec<_> = log.iter().map(|e| (e.process_name.as_str(), e.status)).collect();
  assert_eq!(statuses, [
    (process::LOAD_WAREHOUSE, RunStatus::Failed),
    (process::LOAD_WAREHOUSE, RunStatus::Success),
    (process::BUILD_MART, RunStatus::Success),
    (process::RECOVER_MART, RunStatus::Failed),
  ]);
  assert!(log.iter().all(|e| e.duration_sec >= 0.0));
  assert_eq!(pipeline.audit_log(Some(2)).unwrap().len(), 2);
}
