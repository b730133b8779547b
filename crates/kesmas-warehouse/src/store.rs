//! Opening SQLite files for the warehouse, mart and audit stores.
//!
//! Each store is a single file. Connections are plain
//! [`rusqlite::Connection`] values owned by one run and closed when dropped.

use std::{path::Path, time::Duration};

use rusqlite::{Connection, OpenFlags};

use crate::{Error, Result};

const PRAGMAS: &str = "
PRAGMA foreign_keys = ON;
";

/// How long a writer waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the store at `path`, creating parent directories.
pub fn open(path: &Path) -> Result<Connection> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
  }
  let conn = Connection::open(path)?;
  configure(&conn)?;
  Ok(conn)
}

/// Open an existing store read-only.
pub fn open_read_only(path: &Path) -> Result<Connection> {
  let conn = Connection::open_with_flags(
    path,
    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
  )?;
  Ok(conn)
}

/// Open an in-memory store.
pub fn open_in_memory() -> Result<Connection> {
  let conn = Connection::open_in_memory()?;
  configure(&conn)?;
  Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
  conn.busy_timeout(BUSY_TIMEOUT)?;
  conn.execute_batch(PRAGMAS)?;
  Ok(())
}
