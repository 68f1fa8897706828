//! Runtime settings, layered from an optional TOML file, `TALLY_*` environment
//! variables and command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

/// Settings shared by every subcommand.
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  /// Default number of snapshots shown by `list` and included in `export`.
  #[serde(default = "default_list_limit")]
  pub list_limit: usize,
}

fn default_store_path() -> PathBuf { PathBuf::from("tally.db") }

fn default_list_limit() -> usize { 20 }

impl Settings {
  /// Read `config_path` (if it exists) and the environment. `db` overrides
  /// the configured store path.
  pub fn load(config_path: &Path, db: Option<PathBuf>) -> anyhow::Result<Self> {
    let raw = config::Config::builder()
      .add_source(config::File::from(config_path).required(false))
      .add_source(config::Environment::with_prefix("TALLY").try_parsing(true))
      .build()
      .context("failed to read config file")?;

    let mut settings: Settings = raw
      .try_deserialize()
      .context("failed to deserialise settings")?;

    if let Some(db) = db {
      settings.store_path = db;
    }
    settings.store_path = expand_tilde(&settings.store_path);
    Ok(settings)
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
