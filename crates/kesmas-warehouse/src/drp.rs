//! Disaster-recovery plumbing: timestamped backups taken before every
//! destructive rebuild, and restore-from-latest-backup on demand.
//!
//! A store file moves through Present → Backed-up → Deleted → Rebuilt.
//! [`BackupManager::prepare_rebuild`] drives the first three transitions and
//! reports which path it took as a [`RebuildOutcome`]; the caller rebuilds.
//!
//! Backups live flat in one directory as `<stem>_<YYYYMMDD_HHMMSS>_backup.db`
//! (or `<stem>_<YYYYMMDD_HHMMSS>-<n>_backup.db` when a second backup of the
//! same stem lands in the same second). Copies in flight carry a hidden
//! `.<name>.partial` or `.<name>.recovering` name until they are complete.

use std::{
  fs,
  io::{self, Read},
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::{DateTime, Local, NaiveDateTime, Timelike, Utc};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const NAME_SUFFIX: &str = "_backup.db";

// ─── Types ───────────────────────────────────────────────────────────────────

/// An immutable full copy of a store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
  pub path:     PathBuf,
  /// Local time encoded in the file name.
  pub taken_at: NaiveDateTime,
  /// Disambiguates backups taken within the same second; 0 for the first.
  pub sequence: u32,
  pub modified: DateTime<Utc>,
}

/// Which path [`BackupManager::prepare_rebuild`] took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RebuildOutcome {
  /// No file existed; nothing to back up.
  Fresh,
  /// The file was backed up and then deleted.
  BackedUp(BackupArtifact),
  /// The backup failed. The original is kept and will be overwritten in
  /// place by the schema reset.
  BackupSkipped { reason: String },
}

impl RebuildOutcome {
  pub fn artifact(&self) -> Option<&BackupArtifact> {
    match self {
      RebuildOutcome::BackedUp(artifact) => Some(artifact),
      _ => None,
    }
  }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackupManager {
  backup_dir: PathBuf,
}

impl BackupManager {
  pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
    Self { backup_dir: backup_dir.into() }
  }

  pub fn backup_dir(&self) -> &Path { &self.backup_dir }

  /// Copy `target` into the backup directory and verify the copy.
  ///
  /// The copy is written under a hidden `.partial` name and only renamed to
  /// its backup name once its SHA-256 digest matches the source, so a failed
  /// backup never leaves a listable artifact behind.
  pub fn backup(&self, target: &Path) -> Result<BackupArtifact> {
    let stem = file_stem(target)?;
    fs::create_dir_all(&self.backup_dir).map_err(|e| Error::io(&self.backup_dir, e))?;

    let taken_at = Local::now().naive_local();
    let (path, sequence) = self.free_name(stem, taken_at);
    let partial = hidden_sibling(&path, "partial")?;

    let digest = copy_verified(target, &partial)?;
    fs::rename(&partial, &path).map_err(|e| {
      discard(&partial);
      Error::io(&path, e)
    })?;

    let modified = modified_at(&path)?;
    tracing::info!(
      target = %target.display(),
      backup = %path.display(),
      sha256 = %digest,
      "backup written"
    );
    Ok(BackupArtifact { path, taken_at: trim_to_second(taken_at), sequence, modified })
  }

  /// Back up and delete `target` so it can be rebuilt from scratch.
  ///
  /// A failed backup is not fatal: the original is kept and the outcome is
  /// [`RebuildOutcome::BackupSkipped`]. Failing to delete after a good
  /// backup is fatal, as is finding the file locked by another connection.
  pub fn prepare_rebuild(&self, target: &Path) -> Result<RebuildOutcome> {
    if !target.exists() {
      tracing::debug!(target = %target.display(), "no existing file; fresh build");
      return Ok(RebuildOutcome::Fresh);
    }

    let artifact = match self.backup(target) {
      Ok(artifact) => artifact,
      Err(e) => {
        tracing::warn!(
          target = %target.display(),
          error = %e,
          "backup failed; rebuilding without a fresh backup"
        );
        return Ok(RebuildOutcome::BackupSkipped { reason: e.to_string() });
      }
    };

    ensure_unlocked(target)?;
    fs::remove_file(target).map_err(|e| Error::io(target, e))?;
    remove_journal(target)?;
    tracing::info!(target = %target.display(), "deleted for rebuild");

    Ok(RebuildOutcome::BackedUp(artifact))
  }

  /// Backups of `target`, newest first.
  ///
  /// Ordered by modification time, ties broken by the timestamp in the name.
  /// A missing backup directory yields an empty list.
  pub fn list_backups(&self, target: &Path) -> Result<Vec<BackupArtifact>> {
    let stem = file_stem(target)?;
    let entries = match fs::read_dir(&self.backup_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(Error::io(&self.backup_dir, e)),
    };

    let mut artifacts = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|e| Error::io(&self.backup_dir, e))?;
      if !entry.file_type().is_ok_and(|t| t.is_file()) {
        continue;
      }
      let path = entry.path();
      let Some((taken_at, sequence)) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| parse_backup_name(stem, n))
      else {
        continue;
      };
      let modified = modified_at(&path)?;
      artifacts.push(BackupArtifact { path, taken_at, sequence, modified });
    }

    artifacts.sort_by(|a, b| {
      b.modified
        .cmp(&a.modified)
        .then_with(|| b.taken_at.cmp(&a.taken_at))
        .then_with(|| b.sequence.cmp(&a.sequence))
    });
    Ok(artifacts)
  }

  /// Restore the newest backup of `target` over it.
  ///
  /// Fails with [`Error::NoBackup`] rather than leaving an empty store behind.
  /// The copy goes to a sibling temporary file first and is renamed into
  /// place.
  pub fn recover(&self, target: &Path) -> Result<BackupArtifact> {
    let Some(latest) = self.list_backups(target)?.into_iter().next() else {
      return Err(Error::NoBackup {
        stem: file_stem(target)?.to_owned(),
        dir:  self.backup_dir.clone(),
      });
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    if target.exists() {
      ensure_unlocked(target)?;
    }
    let staging = hidden_sibling(target, "recovering")?;
    let mut source = fs::File::open(&latest.path).map_err(|e| Error::io(&latest.path, e))?;
    write_staged(&mut source, &staging)?;

    // A leftover hot journal would be replayed against the restored file.
    if let Err(e) = remove_journal(target) {
      discard(&staging);
      return Err(e);
    }
    fs::rename(&staging, target).map_err(|e| {
      discard(&staging);
      Error::io(target, e)
    })?;

    tracing::info!(
      target = %target.display(),
      backup = %latest.path.display(),
      "restored from backup"
    );
    Ok(latest)
  }

  /// The first unused backup path for `stem` at `taken_at`.
  fn free_name(&self, stem: &str, taken_at: NaiveDateTime) -> (PathBuf, u32) {
    let ts = taken_at.format(NAME_TIMESTAMP_FORMAT).to_string();
    let mut sequence = 0u32;
    loop {
      let name = match sequence {
        0 => format!("{stem}_{ts}{NAME_SUFFIX}"),
        n => format!("{stem}_{ts}-{n}{NAME_SUFFIX}"),
      };
      let path = self.backup_dir.join(name);
      if !path.exists() {
        return (path, sequence);
      }
      sequence += 1;
    }
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse `<stem>_<YYYYMMDD_HHMMSS>[-<n>]_backup.db`. Anything else is not a
/// backup of `stem`.
fn parse_backup_name(stem: &str, name: &str) -> Option<(NaiveDateTime, u32)> {
  let middle = name.strip_prefix(stem)?.strip_prefix('_')?.strip_suffix(NAME_SUFFIX)?;
  let (ts, sequence) = match middle.split_once('-') {
    Some((ts, n)) => (ts, n.parse::<u32>().ok().filter(|n| *n > 0)?),
    None => (middle, 0),
  };
  let taken_at = NaiveDateTime::parse_from_str(ts, NAME_TIMESTAMP_FORMAT).ok()?;
  Some((taken_at, sequence))
}

fn file_stem(path: &Path) -> Result<&str> {
  path.file_stem().and_then(|s| s.to_str()).filter(|s| !s.is_empty()).ok_or_else(|| {
    Error::io(path, io::Error::new(io::ErrorKind::InvalidInput, "path has no file stem"))
  })
}

/// `.<name>.<suffix>` next to `path`. Never parses as a backup name.
fn hidden_sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
  let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
    Error::io(path, io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
  })?;
  Ok(path.with_file_name(format!(".{name}.{suffix}")))
}

/// Stream `reader` into a new file at `dest` and flush it to disk. The file
/// is removed if any step fails.
fn write_staged(reader: &mut impl Read, dest: &Path) -> Result<()> {
  let written = fs::File::create(dest).and_then(|mut file| {
    io::copy(reader, &mut file)?;
    file.sync_all()
  });
  written.map_err(|e| {
    discard(dest);
    Error::io(dest, e)
  })
}

/// Copy `source` to `dest` and check both digests match. Returns the digest;
/// on any failure `dest` is gone.
fn copy_verified(source: &Path, dest: &Path) -> Result<String> {
  let mut file = fs::File::open(source).map_err(|e| Error::io(source, e))?;
  write_staged(&mut file, dest)?;

  let checked = sha256_file(source).and_then(|expected| {
    let actual = sha256_file(dest)?;
    if expected == actual {
      return Ok(actual);
    }
    Err(Error::io(
      dest,
      io::Error::new(
        io::ErrorKind::InvalidData,
        format!("backup digest {actual} does not match source digest {expected}"),
      ),
    ))
  });
  if checked.is_err() {
    discard(dest);
  }
  checked
}

/// Best-effort removal of a temporary file.
fn discard(path: &Path) {
  match fs::remove_file(path) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => {
      tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary file");
    }
  }
}

fn journal_path(target: &Path) -> PathBuf {
  let mut name = target.as_os_str().to_owned();
  name.push("-journal");
  PathBuf::from(name)
}

fn remove_journal(target: &Path) -> Result<()> {
  let journal = journal_path(target);
  match fs::remove_file(&journal) {
    Ok(()) => {
      tracing::debug!(journal = %journal.display(), "removed stale rollback journal");
      Ok(())
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(Error::io(journal, e)),
  }
}

/// Take and release an exclusive lock on the SQLite file at `target`.
///
/// Fails with [`Error::WarehouseLocked`] if another connection holds a lock.
/// Files SQLite cannot read as a database are left for the caller to
/// replace.
fn ensure_unlocked(target: &Path) -> Result<()> {
  let conn = Connection::open_with_flags(target, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
  conn.busy_timeout(Duration::ZERO)?;
  match conn.execute_batch("BEGIN EXCLUSIVE; ROLLBACK;") {
    Ok(()) => Ok(()),
    Err(rusqlite::Error::SqliteFailure(e, _))
      if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
    {
      Err(Error::WarehouseLocked(target.to_path_buf()))
    }
    Err(e) => {
      tracing::warn!(
        target = %target.display(),
        error = %e,
        "lock probe failed; file is not a usable database"
      );
      Ok(())
    }
  }
}

fn sha256_file(path: &Path) -> Result<String> {
  let mut file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
  Ok(hex::encode(hasher.finalize()))
}

fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
  let modified = fs::metadata(path)
    .and_then(|m| m.modified())
    .map_err(|e| Error::io(path, e))?;
  Ok(DateTime::<Utc>::from(modified))
}

fn trim_to_second(dt: NaiveDateTime) -> NaiveDateTime {
  dt.with_nanosecond(0).unwrap_or(dt)
}
