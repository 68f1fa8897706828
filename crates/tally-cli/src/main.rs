//! `tally`: command-line front end for the follower/following audit store.
//!
//! # Usage
//!
//! ```
//! tally record --input export.json
//! tally diff
//! tally pending
//! tally resolve --username charlie --status renamed --new-username charlie2
//! tally export --output projection.json
//! ```

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tally_core::verification::VerificationStatus;
use tally_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use settings::Settings;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Audit follower/following snapshots over time")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "tally.toml")]
  config: PathBuf,

  /// Path to the SQLite store, overriding the configuration.
  #[arg(long, value_name = "PATH", global = true)]
  db: Option<PathBuf>,

  /// Print machine-readable JSON instead of a text summary.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Persist a snapshot read from a JSON file and diff it against the
  /// previous one.
  Record {
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,
  },

  /// Diff two snapshots; defaults to the two most recent.
  Diff {
    #[arg(long, requires = "new")]
    old: Option<i64>,
    #[arg(long, requires = "old")]
    new: Option<i64>,
  },

  /// Mutuals and one-sided relationships for a snapshot.
  Views {
    /// Snapshot id; defaults to the most recent.
    #[arg(long)]
    snapshot: Option<i64>,
  },

  /// List recent snapshots.
  List {
    #[arg(long)]
    limit: Option<usize>,
  },

  /// Show unresolved verification entries.
  Pending,

  /// Resolve the pending verification entry for an account.
  Resolve {
    #[command(flatten)]
    account: AccountArg,

    #[arg(long)]
    status: VerificationStatus,

    #[arg(long)]
    notes: Option<String>,

    /// Required with `--status renamed`.
    #[arg(long)]
    new_username: Option<String>,
  },

  /// Username and verification history for an account.
  History {
    #[command(flatten)]
    account: AccountArg,
  },

  /// Write the sync/export projection as JSON.
  Export {
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
  },
}

/// An account named either by its canonical pk or by a username.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct AccountArg {
  /// Canonical pk, e.g. `12345` or `username:charlie`.
  #[arg(long)]
  pk: Option<String>,

  /// Username; resolved to its username-derived pk.
  #[arg(long)]
  username: Option<String>,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config, cli.db)?;

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;

  commands::run(&store, &settings, cli.json, cli.command).await
}
