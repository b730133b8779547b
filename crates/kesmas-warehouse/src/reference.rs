//! Reader for the workforce-assumption reference table (CSV with a header
//! row).

use std::path::Path;

use kesmas_core::dimension::AssumptionInput;
use serde::Deserialize;

use crate::{Error, Result};

/// Column layout of the reference file. Unknown columns are ignored.
#[derive(Debug, Deserialize)]
struct ReferenceRow {
  role_label:        Option<String>,
  weekly_workdays:   Option<String>,
  daily_hours:       Option<String>,
  per_patient_hours: Option<String>,
  source_reference:  Option<String>,
}

impl From<ReferenceRow> for AssumptionInput {
  fn from(row: ReferenceRow) -> Self {
    AssumptionInput {
      role_label:        row.role_label,
      weekly_workdays:   row.weekly_workdays,
      daily_hours:       row.daily_hours,
      per_patient_hours: row.per_patient_hours,
      source_reference:  row.source_reference,
    }
  }
}

/// Read the assumption reference at `path`.
///
/// Returns `Ok(None)` when the file does not exist; the caller decides how
/// loudly to report that.
pub fn read_assumptions(path: &Path) -> Result<Option<Vec<AssumptionInput>>> {
  if !path.exists() {
    return Ok(None);
  }
  let reference_err = |source| Error::Reference { path: path.to_path_buf(), source };

  let mut reader = csv::ReaderBuilder::new()
    .trim(csv::Trim::All)
    .flexible(true)
    .from_path(path)
    .map_err(reference_err)?;

  let rows = reader
    .deserialize::<ReferenceRow>()
    .map(|r| r.map(AssumptionInput::from))
    .collect::<Result<Vec<_>, csv::Error>>()
    .map_err(reference_err)?;

  tracing::debug!(rows = rows.len(), path = %path.display(), "read assumption reference");
  Ok(Some(rows))
}
