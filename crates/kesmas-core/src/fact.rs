//! Fact rows: one per staging record, referencing dimensions by surrogate
//! key.
//!
//! A fact either describes disease cases or a workforce headcount, never
//! both. [`FactSubject`] encodes that split so a case fact cannot carry a
//! workforce key and an unresolved key is `None` rather than a sentinel id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, record::RecordKind};

// ─── Surrogate id ────────────────────────────────────────────────────────────

/// A store-assigned dimension key. Only meaningful within one load run.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SurrogateId(pub i64);

impl fmt::Display for SurrogateId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

// ─── Subject ─────────────────────────────────────────────────────────────────

/// The kind-specific dimension keys of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FactSubject {
  Case {
    disease_id: Option<SurrogateId>,
  },
  Workforce {
    workforce_id:  Option<SurrogateId>,
    /// Set only when the assumption reference covers this role.
    assumption_id: Option<SurrogateId>,
  },
}

impl FactSubject {
  pub fn kind(&self) -> RecordKind {
    match self {
      FactSubject::Case { .. } => RecordKind::Case,
      FactSubject::Workforce { .. } => RecordKind::Workforce,
    }
  }

  pub fn disease_id(&self) -> Option<SurrogateId> {
    match self {
      FactSubject::Case { disease_id } => *disease_id,
      FactSubject::Workforce { .. } => None,
    }
  }

  pub fn workforce_id(&self) -> Option<SurrogateId> {
    match self {
      FactSubject::Workforce { workforce_id, .. } => *workforce_id,
      FactSubject::Case { .. } => None,
    }
  }

  pub fn assumption_id(&self) -> Option<SurrogateId> {
    match self {
      FactSubject::Workforce { assumption_id, .. } => *assumption_id,
      FactSubject::Case { .. } => None,
    }
  }

  /// Rebuild a subject from the three nullable key columns of a stored row.
  ///
  /// Fails if a key of the other kind is present.
  pub fn from_columns(
    fact_id:       i64,
    kind:          RecordKind,
    disease_id:    Option<SurrogateId>,
    workforce_id:  Option<SurrogateId>,
    assumption_id: Option<SurrogateId>,
  ) -> Result<Self> {
    match kind {
      RecordKind::Case if workforce_id.is_none() && assumption_id.is_none() => {
        Ok(FactSubject::Case { disease_id })
      }
      RecordKind::Workforce if disease_id.is_none() => {
        Ok(FactSubject::Workforce { workforce_id, assumption_id })
      }
      _ => Err(Error::FactKeyMismatch { id: fact_id, kind: kind.as_str() }),
    }
  }
}

// ─── Fact row ────────────────────────────────────────────────────────────────

/// A row of `fact_health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
  pub id:          i64,
  pub region_id:   Option<SurrogateId>,
  pub year_id:     Option<SurrogateId>,
  pub subject:     FactSubject,
  pub amount:      f64,
  pub source_file: Option<String>,
  pub created_at:  DateTime<Utc>,
}

impl FactRow {
  pub fn kind(&self) -> RecordKind { self.subject.kind() }

  /// True when every key applicable to this fact's kind resolved.
  ///
  /// The assumption key is optional by nature and not considered.
  pub fn is_fully_resolved(&self) -> bool {
    let subject_key = match self.subject {
      FactSubject::Case { disease_id } => disease_id.is_some(),
      FactSubject::Workforce { workforce_id, .. } => workforce_id.is_some(),
    };
    self.region_id.is_some() && self.year_id.is_some() && subject_key
  }
}
