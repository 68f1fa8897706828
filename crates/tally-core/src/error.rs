//! Error types for `tally-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{identity::Pk, snapshot::SnapshotId, verification::VerificationStatus};

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input handed over by an ingestion collaborator.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("invalid diff: {0}")]
  InvalidDiff(#[from] DiffError),

  #[error("invalid transition: {0}")]
  InvalidTransition(#[from] TransitionError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// A diff was requested over a pair of snapshots that cannot be compared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
  #[error(
    "snapshot {old_id} ({old_timestamp}) is not older than snapshot {new_id} \
     ({new_timestamp})"
  )]
  Unordered {
    old_id:        SnapshotId,
    old_timestamp: DateTime<Utc>,
    new_id:        SnapshotId,
    new_timestamp: DateTime<Utc>,
  },

  #[error("snapshot {id} not found")]
  SnapshotNotFound { id: SnapshotId },

  #[error("cannot diff snapshot {id} against itself")]
  SameSnapshot { id: SnapshotId },
}

/// A verification-queue resolution that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
  #[error("no verification entry exists for {pk}")]
  NoEntry { pk: Pk },

  #[error(
    "verification entry {entry_id} for {pk} is already {status}; only pending \
     entries can be resolved"
  )]
  AlreadyResolved {
    pk:       Pk,
    entry_id: i64,
    status:   VerificationStatus,
  },

  #[error("cannot resolve {pk} back to pending")]
  NotTerminal { pk: Pk },

  #[error("resolving {pk} as renamed requires a new username")]
  MissingNewUsername { pk: Pk },

  #[error("a new username is only accepted for renamed, not {status} ({pk})")]
  UnexpectedNewUsername { pk: Pk, status: VerificationStatus },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
