//! Dimension rows of the star schema.
//!
//! Identity dimensions (region, year, disease, workforce) are derived from the
//! staging records of a run. The assumption dimension comes from a
//! hand-maintained reference table; its derived columns are computed here so
//! the arithmetic is independent of any store.

use serde::{Deserialize, Serialize};

use crate::{
  fact::SurrogateId,
  numeric::{parse_decimal, parse_whole, round2},
  record::RecordKind,
};

/// Weeks counted in a working year.
pub const WEEKS_PER_YEAR: i64 = 52;

pub const DEFAULT_WEEKLY_WORKDAYS: i64 = 5;
pub const DEFAULT_DAILY_HOURS: i64 = 8;
pub const DEFAULT_PER_PATIENT_HOURS: f64 = 0.25;

/// Ideal patient load per day per 1000 inhabitants.
pub const IDEAL_PATIENTS_PER_DAY: f64 = 1000.0 / 365.0;

// ─── Identity dimensions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDim {
  pub id:   SurrogateId,
  pub code: String,
  pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearDim {
  pub id:   SurrogateId,
  pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseDim {
  pub id:    SurrogateId,
  pub kind:  RecordKind,
  pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkforceDim {
  pub id:    SurrogateId,
  pub kind:  RecordKind,
  pub label: String,
}

// ─── Assumption dimension ────────────────────────────────────────────────────

/// One row of the assumption reference table, exactly as read.
///
/// Every cell is kept as text; coercion and defaults are applied by
/// [`Assumption::from_input`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssumptionInput {
  pub role_label:        Option<String>,
  pub weekly_workdays:   Option<String>,
  pub daily_hours:       Option<String>,
  pub per_patient_hours: Option<String>,
  pub source_reference:  Option<String>,
}

/// Workload assumptions for one workforce role, with derived capacity
/// figures. Not yet assigned a surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
  pub workforce_label:   String,
  pub weekly_workdays:   i64,
  pub daily_hours:       i64,
  pub per_patient_hours: f64,
  pub weekly_hours:      i64,
  pub yearly_hours:      i64,
  pub yearly_workdays:   i64,
  pub daily_capacity:    f64,
  pub ideal_ratio:       f64,
  pub source_reference:  Option<String>,
}

impl Assumption {
  /// Coerce a reference row, filling defaults for missing or malformed
  /// inputs. Returns `None` when the role label is blank.
  pub fn from_input(input: &AssumptionInput) -> Option<Self> {
    let label = input.role_label.as_deref().map(str::trim)?;
    if label.is_empty() {
      return None;
    }

    let weekly_workdays = input
      .weekly_workdays
      .as_deref()
      .and_then(parse_whole)
      .unwrap_or(DEFAULT_WEEKLY_WORKDAYS);
    let daily_hours = input
      .daily_hours
      .as_deref()
      .and_then(parse_whole)
      .unwrap_or(DEFAULT_DAILY_HOURS);
    // A zero service time would make capacity infinite.
    let per_patient_hours = input
      .per_patient_hours
      .as_deref()
      .and_then(parse_decimal)
      .filter(|h| *h > 0.0)
      .unwrap_or(DEFAULT_PER_PATIENT_HOURS);

    Some(Self::derive(
      label.to_owned(),
      weekly_workdays,
      daily_hours,
      per_patient_hours,
      input.source_reference.clone(),
    ))
  }

  /// Compute the derived columns from the three primary inputs.
  pub fn derive(
    workforce_label:   String,
    weekly_workdays:   i64,
    daily_hours:       i64,
    per_patient_hours: f64,
    source_reference:  Option<String>,
  ) -> Self {
    let weekly_hours = weekly_workdays * daily_hours;
    Self {
      workforce_label,
      weekly_workdays,
      daily_hours,
      per_patient_hours,
      weekly_hours,
      yearly_hours: weekly_hours * WEEKS_PER_YEAR,
      yearly_workdays: weekly_workdays * WEEKS_PER_YEAR,
      daily_capacity: round2(daily_hours as f64 / per_patient_hours),
      ideal_ratio: IDEAL_PATIENTS_PER_DAY,
      source_reference,
    }
  }
}

/// An [`Assumption`] as stored, with its surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumptionDim {
  pub id:         SurrogateId,
  #[serde(flatten)]
  pub assumption: Assumption,
}

/// Reduce reference rows to one assumption per role label, keeping the first
/// occurrence of each label.
pub fn dedup_assumptions(inputs: &[AssumptionInput]) -> Vec<Assumption> {
  let mut seen = std::collections::HashSet::new();
  inputs
    .iter()
    .filter_map(Assumption::from_input)
    .filter(|a| seen.insert(a.workforce_label.clone()))
    .collect()
}
