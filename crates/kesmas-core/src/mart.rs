//! Rows of the three mart tables: pre-aggregated summaries read by
//! dashboards.

use serde::{Deserialize, Serialize};

use crate::fact::SurrogateId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
  pub year:          i32,
  pub region_name:   Option<String>,
  pub disease_label: String,
  pub total_cases:   f64,
}

/// Keyed by warehouse surrogate ids, valid only against the warehouse load
/// the mart was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkforceSummary {
  pub year_id:         SurrogateId,
  pub region_id:       SurrogateId,
  pub workforce_id:    SurrogateId,
  pub workforce_label: Option<String>,
  pub total_workforce: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRatio {
  pub year:            i32,
  pub region_name:     Option<String>,
  pub total_workforce: f64,
  pub total_cases:     f64,
  /// Cases per worker; 0 when there is no workforce.
  pub workforce_ratio: f64,
}

impl WorkloadRatio {
  pub fn new(
    year: i32,
    region_name: Option<String>,
    total_workforce: f64,
    total_cases: f64,
  ) -> Self {
    let workforce_ratio = if total_workforce > 0.0 { total_cases / total_workforce } else { 0.0 };
    Self { year, region_name, total_workforce, total_cases, workforce_ratio }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ratio_divides_cases_by_workforce() {
    let r = WorkloadRatio::new(2024, Some("Banjar".into()), 15.0, 120.0);
    assert_eq!(r.workforce_ratio, 8.0);
  }

  #[test]
  fn zero_workforce_yields_zero_ratio() {
    let r = WorkloadRatio::new(2024, None, 0.0, 120.0);
    assert_eq!(r.workforce_ratio, 0.0);
    assert!(WorkloadRatio::new(2024, None, -3.0, 1.0).workforce_ratio == 0.0);
  }
}
