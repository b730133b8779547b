//! Error types for `kesmas-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown record kind: {0:?}")]
  UnknownRecordKind(String),

  #[error("unknown run status: {0:?}")]
  UnknownRunStatus(String),

  /// A stored fact row carries keys of both record kinds, or keys of the
  /// wrong kind.
  #[error("fact {id} violates the {kind} key invariant")]
  FactKeyMismatch { id: i64, kind: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
