//! `kesmas`: batch driver for the health-statistics warehouse.
//!
//! Reads `kesmas.toml` (or the path given with `--config`) layered with
//! `KESMAS_*` environment variables, then runs one pipeline step.
//!
//! # Usage
//!
//! ```
//! kesmas run
//! kesmas --data-root /srv/kesmas/Data load
//! kesmas recover --mart
//! kesmas audit --limit 5
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kesmas_core::audit::AuditLogEntry;
use kesmas_warehouse::{BackupArtifact, Pipeline, PipelineConfig, RebuildOutcome};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Kesmas health-statistics warehouse")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "kesmas.toml")]
  config: PathBuf,

  /// Root of the data directory; overrides `data_root` from the config.
  #[arg(long, value_name = "DIR")]
  data_root: Option<PathBuf>,

  /// Print reports as JSON instead of plain text.
  #[arg(long)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Rebuild the warehouse from the staging tables.
  Load,
  /// Rebuild the marts from the current warehouse.
  Mart,
  /// Load the warehouse, then build the marts.
  Run,
  /// Restore the newest backup of the warehouse.
  Recover {
    /// Restore the mart instead.
    #[arg(long)]
    mart: bool,
  },
  /// List backups, newest first.
  Backups {
    /// List mart backups instead.
    #[arg(long)]
    mart: bool,
  },
  /// Show the most recent audit log entries.
  Audit {
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
}

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Shape of the layered configuration. Every path except `data_root` is an
/// optional override of the standard layout.
#[derive(Deserialize, Debug)]
struct Settings {
  #[serde(default = "default_data_root")]
  data_root:            PathBuf,
  case_staging:         Option<PathBuf>,
  workforce_staging:    Option<PathBuf>,
  assumption_reference: Option<PathBuf>,
  warehouse:            Option<PathBuf>,
  mart:                 Option<PathBuf>,
  audit:                Option<PathBuf>,
  backup_dir:           Option<PathBuf>,
}

fn default_data_root() -> PathBuf { PathBuf::from("Data") }

impl Settings {
  fn pipeline_config(self) -> PipelineConfig {
    let defaults = PipelineConfig::from_data_root(expand_tilde(&self.data_root));
    let pick = |custom: Option<PathBuf>, default: PathBuf| {
      custom.map(|p| expand_tilde(&p)).unwrap_or(default)
    };
    PipelineConfig {
      case_staging:         pick(self.case_staging, defaults.case_staging),
      workforce_staging:    pick(self.workforce_staging, defaults.workforce_staging),
      assumption_reference: pick(self.assumption_reference, defaults.assumption_reference),
      warehouse:            pick(self.warehouse, defaults.warehouse),
      mart:                 pick(self.mart, defaults.mart),
      audit:                pick(self.audit, defaults.audit),
      backup_dir:           pick(self.backup_dir, defaults.backup_dir),
    }
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.as_path()).required(false))
    .add_source(config::Environment::with_prefix("KESMAS"))
    .set_override_option(
      "data_root",
      cli.data_root.as_ref().map(|p| p.to_string_lossy().into_owned()),
    )
    .context("failed to apply --data-root")?
    .build()
    .context("failed to read config file")?;

  let settings: Settings = settings
    .try_deserialize()
    .context("failed to deserialise settings")?;
  let pipeline = Pipeline::new(settings.pipeline_config());
  tracing::debug!(config = ?pipeline.config(), "pipeline configured");

  let out = Output { json: cli.json };
  match cli.command {
    Command::Load => {
      let report = pipeline.load().context("warehouse load failed")?;
      out.emit(&report, || {
        println!("loaded {} staging rows", report.master_rows);
        println!(
          "  dimensions: {} regions, {} years, {} diseases, {} workforce roles, {}",
          report.dimensions.regions,
          report.dimensions.years,
          report.dimensions.diseases,
          report.dimensions.workforce,
          match report.dimensions.assumptions {
            Some(n) => format!("{n} assumptions"),
            None => "no assumption reference".to_string(),
          },
        );
        println!(
          "  facts: {} written, {} with unresolved keys",
          report.facts.rows_written,
          report.facts.unresolved.required()
        );
        print_rebuild("warehouse", &report.rebuild);
      })?;
    }
    Command::Mart => {
      let report = pipeline.build_marts().context("mart build failed")?;
      out.emit(&report, || {
        println!(
          "built marts: {} case, {} workforce, {} ratio rows",
          report.case_rows, report.workforce_rows, report.ratio_rows
        );
        print_rebuild("mart", &report.rebuild);
      })?;
    }
    Command::Run => {
      let report = pipeline.run().context("daily workflow failed")?;
      out.emit(&report, || {
        println!(
          "loaded {} staging rows into {} facts",
          report.load.master_rows, report.load.facts.rows_written
        );
        print_rebuild("warehouse", &report.load.rebuild);
        println!(
          "built marts: {} case, {} workforce, {} ratio rows",
          report.marts.case_rows, report.marts.workforce_rows, report.marts.ratio_rows
        );
        print_rebuild("mart", &report.marts.rebuild);
      })?;
    }
    Command::Recover { mart } => {
      let artifact = if mart {
        pipeline.recover_mart().context("mart recovery failed")?
      } else {
        pipeline.recover_warehouse().context("warehouse recovery failed")?
      };
      out.emit(&artifact, || println!("restored from {}", artifact.path.display()))?;
    }
    Command::Backups { mart } => {
      let backups = pipeline.list_backups(mart).context("failed to list backups")?;
      out.emit(&backups, || print_backups(&backups))?;
    }
    Command::Audit { limit } => {
      let entries = pipeline.audit_log(Some(limit)).context("failed to read audit log")?;
      out.emit(&entries, || print_audit(&entries))?;
    }
  }

  Ok(())
}

// ─── Output ───────────────────────────────────────────────────────────────────

struct Output {
  json: bool,
}

impl Output {
  /// Print `value` as JSON, or run `text` for the plain rendering.
  fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
    if self.json {
      let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
      println!("{rendered}");
    } else {
      text();
    }
    Ok(())
  }
}

fn print_rebuild(what: &str, outcome: &RebuildOutcome) {
  match outcome {
    RebuildOutcome::Fresh => println!("  {what}: built fresh"),
    RebuildOutcome::BackedUp(artifact) => {
      println!("  {what}: previous file backed up to {}", artifact.path.display());
    }
    RebuildOutcome::BackupSkipped { reason } => {
      println!("  {what}: WARNING backup skipped ({reason})");
    }
  }
}

fn print_backups(backups: &[BackupArtifact]) {
  if backups.is_empty() {
    println!("no backups");
    return;
  }
  for b in backups {
    println!("{}  {}", b.taken_at.format("%Y-%m-%d %H:%M:%S"), b.path.display());
  }
}

fn print_audit(entries: &[AuditLogEntry]) {
  for e in entries {
    println!(
      "{:>4}  {}  {:<18} {:<7} {:>8.3}s {:>6} rows  {}",
      e.id,
      e.timestamp,
      e.process_name,
      e.status.as_str(),
      e.duration_sec,
      e.rows_loaded,
      e.message.as_deref().unwrap_or("")
    );
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn overrides_replace_default_paths() {
    let settings = Settings {
      data_root:            PathBuf::from("/data"),
      case_staging:         None,
      workforce_staging:    None,
      assumption_reference: None,
      warehouse:            Some(PathBuf::from("/fast/core.db")),
      mart:                 None,
      audit:                None,
      backup_dir:           None,
    };
    let config = settings.pipeline_config();
    assert_eq!(config.warehouse, PathBuf::from("/fast/core.db"));
    assert_eq!(config.backup_dir, PathBuf::from("/data/06_backup"));
    assert_eq!(
      config.case_staging,
      PathBuf::from("/data/02_staging/stg_kasus_penyakit.db")
    );
  }

  #[test]
  fn cli_parses_subcommands() {
    let cli = Cli::try_parse_from(["kesmas", "recover", "--mart"]).unwrap();
    assert!(matches!(cli.command, Command::Recover { mart: true }));
    assert_eq!(cli.config, PathBuf::from("kesmas.toml"));

    let cli = Cli::try_parse_from(["kesmas", "--json", "audit", "--limit", "3"]).unwrap();
    assert!(cli.json);
    assert!(matches!(cli.command, Command::Audit { limit: 3 }));
  }
}
