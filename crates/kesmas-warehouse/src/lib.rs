//! SQLite warehouse for the Kesmas health-statistics pipeline.
//!
//! Reads the staging tables and the assumption reference, rebuilds the star
//! schema from scratch on every load, rolls it up into marts, and keeps
//! timestamped backups plus an append-only audit log alongside. Everything
//! is synchronous and runs on plain [`rusqlite`] connections.

mod encode;
mod store;

pub mod audit;
pub mod dimension;
pub mod drp;
pub mod error;
pub mod fact;
pub mod mart;
pub mod pipeline;
pub mod reference;
pub mod schema;
pub mod staging;

pub use audit::AuditLog;
pub use drp::{BackupArtifact, BackupManager, RebuildOutcome};
pub use error::{Error, Result};
pub use pipeline::{LoadReport, Pipeline, PipelineConfig, RunReport};
pub use store::{open, open_in_memory, open_read_only};

#[cfg(test)]
mod tests;
