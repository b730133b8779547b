//! SQL schema for the warehouse, mart and audit stores.
//!
//! Warehouse and mart tables are dropped and recreated on every load; the
//! audit table is created once and only ever appended to.

use rusqlite::Connection;

use crate::Result;

/// Warehouse tables, children first so drops never trip a foreign key.
pub const WAREHOUSE_TABLES: &[&str] = &[
  "fact_health",
  "dim_assumption",
  "dim_workforce",
  "dim_disease",
  "dim_year",
  "dim_region",
];

pub const MART_TABLES: &[&str] = &[
  "mart_annual_case_summary",
  "mart_annual_workforce_summary",
  "mart_workload_ratio",
];

/// Star-schema DDL. Run only after [`WAREHOUSE_TABLES`] have been dropped.
pub const WAREHOUSE_SCHEMA: &str = "
CREATE TABLE dim_region (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT
);

CREATE TABLE dim_year (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    year INTEGER NOT NULL UNIQUE
);

CREATE TABLE dim_disease (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    kind  TEXT NOT NULL,
    label TEXT NOT NULL UNIQUE
);

CREATE TABLE dim_workforce (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    kind  TEXT NOT NULL,
    label TEXT NOT NULL UNIQUE
);

-- Derived columns are computed by the loader, not by SQL.
CREATE TABLE dim_assumption (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    workforce_label   TEXT    NOT NULL UNIQUE,
    weekly_workdays   INTEGER NOT NULL,
    daily_hours       INTEGER NOT NULL,
    per_patient_hours REAL    NOT NULL,
    weekly_hours      INTEGER NOT NULL,
    yearly_hours      INTEGER NOT NULL,
    yearly_workdays   INTEGER NOT NULL,
    daily_capacity    REAL    NOT NULL,
    ideal_ratio       REAL    NOT NULL,
    source_reference  TEXT
);

-- Unresolved keys are NULL, never 0.
CREATE TABLE fact_health (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    region_id     INTEGER REFERENCES dim_region(id),
    year_id       INTEGER REFERENCES dim_year(id),
    disease_id    INTEGER REFERENCES dim_disease(id),
    workforce_id  INTEGER REFERENCES dim_workforce(id),
    assumption_id INTEGER REFERENCES dim_assumption(id),
    record_kind   TEXT NOT NULL CHECK (record_kind IN ('case', 'workforce')),
    amount        REAL NOT NULL,
    source_file   TEXT,
    created_at    TEXT NOT NULL,
    CHECK (disease_id IS NULL OR workforce_id IS NULL),
    CHECK (record_kind = 'workforce' OR assumption_id IS NULL)
);

CREATE INDEX fact_health_year_region_idx ON fact_health(year_id, region_id);
CREATE INDEX fact_health_kind_idx        ON fact_health(record_kind);

PRAGMA user_version = 1;
";

pub const MART_SCHEMA: &str = "
CREATE TABLE mart_annual_case_summary (
    year          INTEGER NOT NULL,
    region_name   TEXT,
    disease_label TEXT NOT NULL,
    total_cases   REAL NOT NULL
);

CREATE TABLE mart_annual_workforce_summary (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    year_id         INTEGER NOT NULL,
    region_id       INTEGER NOT NULL,
    workforce_id    INTEGER NOT NULL,
    workforce_label TEXT,
    total_workforce REAL NOT NULL
);

CREATE TABLE mart_workload_ratio (
    year            INTEGER NOT NULL,
    region_name     TEXT,
    total_workforce REAL NOT NULL,
    total_cases     REAL NOT NULL,
    workforce_ratio REAL NOT NULL
);
";

/// Idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const AUDIT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS etl_audit_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp    TEXT    NOT NULL,
    process_name TEXT    NOT NULL,
    status       TEXT    NOT NULL CHECK (status IN ('SUCCESS', 'FAILED')),
    message      TEXT,
    duration_sec REAL    NOT NULL,
    rows_loaded  INTEGER NOT NULL DEFAULT 0
);
";

/// Drop every warehouse table and recreate the star schema, empty.
pub fn reset_schema(conn: &Connection) -> Result<()> {
  drop_tables(conn, WAREHOUSE_TABLES)?;
  conn.execute_batch(WAREHOUSE_SCHEMA)?;
  tracing::debug!("warehouse schema recreated");
  Ok(())
}

/// Drop every mart table and recreate them, empty.
pub fn reset_mart_schema(conn: &Connection) -> Result<()> {
  drop_tables(conn, MART_TABLES)?;
  conn.execute_batch(MART_SCHEMA)?;
  tracing::debug!("mart schema recreated");
  Ok(())
}

pub fn ensure_audit_table(conn: &Connection) -> Result<()> {
  conn.execute_batch(AUDIT_SCHEMA)?;
  Ok(())
}

fn drop_tables(conn: &Connection, tables: &[&str]) -> Result<()> {
  for table in tables {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
  }
  Ok(())
}

/// Restart the AUTOINCREMENT counters of `tables` so ids begin at 1 again.
pub(crate) fn reset_sequences(conn: &Connection, tables: &[&str]) -> Result<()> {
  let exists: bool = conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE name = 'sqlite_sequence')",
    [],
    |r| r.get(0),
  )?;
  if !exists {
    return Ok(());
  }
  let mut stmt = conn.prepare("DELETE FROM sqlite_sequence WHERE name = ?1")?;
  for table in tables {
    stmt.execute([table])?;
  }
  Ok(())
}

/// Whether `table` exists in the main database of `conn`.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
    [table],
    |r| r.get(0),
  )?)
}
