//! Error type for `kesmas-warehouse`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] kesmas_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("i/o error on {path}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("reference data error in {path}: {source}")]
  Reference {
    path:   PathBuf,
    #[source]
    source: csv::Error,
  },

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// Neither staging table yielded any rows. Raised before anything is
  /// touched.
  #[error("staging data is empty; nothing to load")]
  StagingEmpty,

  /// Another connection holds a lock on the file about to be deleted.
  #[error("{0} is locked by another process; refusing to rebuild")]
  WarehouseLocked(PathBuf),

  /// Marts were requested but no warehouse has been loaded.
  #[error("warehouse {0} does not exist; load it before building marts")]
  WarehouseMissing(PathBuf),

  /// Recovery found no backup artifact for the target.
  #[error("no backup of {stem:?} found in {dir}")]
  NoBackup { stem: String, dir: PathBuf },
}

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Error::Io { path: path.into(), source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
