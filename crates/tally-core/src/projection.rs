//! Serializable projection consumed by sync and dashboard collaborators.
//!
//! Field names are part of an external contract and must stay stable. The
//! `digest` is a SHA-256 over the canonical JSON of every other field, so a
//! consumer can skip payloads it has already seen.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
  Result,
  diff::DiffResult,
  identity::AccountRecord,
  snapshot::{Snapshot, SnapshotSummary},
  views::{RelationshipView, relationship_view},
};

pub const PROJECTION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
  pub schema_version: u32,
  /// Most recent first.
  pub snapshots:      Vec<SnapshotSummary>,
  /// Sorted by `pk`.
  pub accounts:       Vec<AccountRecord>,
  pub latest_diff:    Option<DiffResult>,
  /// Relationship view of the most recent snapshot.
  pub relationships:  Option<RelationshipView>,
  pub digest:         String,
}

/// Everything [`project`] reads. Nothing here is mutated.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInput<'a> {
  pub snapshots:   &'a [SnapshotSummary],
  pub accounts:    &'a [AccountRecord],
  pub latest:      Option<&'a Snapshot>,
  pub latest_diff: Option<&'a DiffResult>,
}

#[derive(Serialize)]
struct DigestBody<'a> {
  schema_version: u32,
  snapshots:      &'a [SnapshotSummary],
  accounts:       &'a [AccountRecord],
  latest_diff:    Option<&'a DiffResult>,
  relationships:  Option<&'a RelationshipView>,
}

/// Map stored state onto the projection. Pure: the same input always yields
/// the same projection and digest, whatever order the slices arrive in.
pub fn project(input: ProjectionInput<'_>) -> Result<Projection> {
  let mut snapshots = input.snapshots.to_vec();
  snapshots.sort_by(|a, b| {
    b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id))
  });

  let mut accounts = input.accounts.to_vec();
  accounts.sort_by(|a, b| a.identity.pk.cmp(&b.identity.pk));

  let relationships = input.latest.map(relationship_view);
  let latest_diff = input.latest_diff.cloned();

  let body = DigestBody {
    schema_version: PROJECTION_SCHEMA_VERSION,
    snapshots:      &snapshots,
    accounts:       &accounts,
    latest_diff:    latest_diff.as_ref(),
    relationships:  relationships.as_ref(),
  };
  let digest = hex::encode(Sha256::digest(serde_json::to_vec(&body)?));

  Ok(Projection {
    schema_version: PROJECTION_SCHEMA_VERSION,
    snapshots,
    accounts,
    latest_diff,
    relationships,
    digest,
  })
}
