//! Snapshots: immutable point-in-time captures of follower/following
//! membership.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  identity::{AccountIdentity, RawAccount, resolve, validate_raw},
};

/// Monotonic identifier assigned by the store when a snapshot is created.
pub type SnapshotId = i64;

/// Provenance tag used when the ingestion collaborator does not supply one.
pub const DEFAULT_SOURCE: &str = "export";

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// A persisted snapshot. Membership never changes once written.
///
/// Both sets are ordered by `pk`, which also rules out duplicate `pk`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
  pub id:        SnapshotId,
  pub timestamp: DateTime<Utc>,
  pub source:    String,
  pub followers: BTreeSet<AccountIdentity>,
  pub following: BTreeSet<AccountIdentity>,
}

impl Snapshot {
  pub fn summary(&self) -> SnapshotSummary {
    SnapshotSummary {
      id:              self.id,
      timestamp:       self.timestamp,
      source:          self.source.clone(),
      follower_count:  self.followers.len(),
      following_count: self.following.len(),
    }
  }

  /// Look up an account in either list, preferring the follower entry.
  pub fn find(&self, account: &AccountIdentity) -> Option<&AccountIdentity> {
    self.followers.get(account).or_else(|| self.following.get(account))
  }
}

/// Listing row for a snapshot; membership is not loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
  pub id:              SnapshotId,
  pub timestamp:       DateTime<Utc>,
  pub source:          String,
  pub follower_count:  usize,
  pub following_count: usize,
}

/// Result of asking the store for the two most recent snapshots.
#[derive(Debug, Clone)]
pub enum LatestPair {
  Pair { old: Snapshot, new: Snapshot },
  /// Fewer than two snapshots exist; there is nothing to compare yet.
  Insufficient { snapshot_count: usize },
}

// ─── NewSnapshot ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::AuditStore::create_snapshot`], as produced by an
/// ingestion collaborator. The `id` is always assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSnapshot {
  /// Stored with microsecond precision; anything finer is truncated, so two
  /// timestamps within the same microsecond are the same instant to the store.
  pub timestamp: DateTime<Utc>,
  #[serde(default = "default_source")]
  pub source:    String,
  #[serde(default)]
  pub followers: Vec<RawAccount>,
  #[serde(default)]
  pub following: Vec<RawAccount>,
}

fn default_source() -> String { DEFAULT_SOURCE.to_owned() }

impl NewSnapshot {
  pub fn new(timestamp: DateTime<Utc>) -> Self {
    Self {
      timestamp,
      source: default_source(),
      followers: Vec::new(),
      following: Vec::new(),
    }
  }

  /// Reject malformed ingestion data before anything touches the store.
  pub fn validate(&self) -> Result<()> {
    if self.source.trim().is_empty() {
      return Err(crate::Error::InvalidInput(
        "snapshot source tag is blank".into(),
      ));
    }
    for (i, raw) in self.followers.iter().enumerate() {
      validate_raw("followers", i, raw)?;
    }
    for (i, raw) in self.following.iter().enumerate() {
      validate_raw("following", i, raw)?;
    }
    Ok(())
  }

  /// Resolve both lists, preserving input order and any duplicates so the
  /// store can reject them.
  pub fn resolve_lists(&self) -> (Vec<AccountIdentity>, Vec<AccountIdentity>) {
    (
      self.followers.iter().map(resolve).collect(),
      self.following.iter().map(resolve).collect(),
    )
  }
}
