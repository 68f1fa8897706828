//! Store-generic audit workflow: persist, diff, enqueue, resolve, project.
//!
//! Diffing and verification are connected only through the durable
//! verification entries. Nothing here blocks on a human decision.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  diff::{DiffResult, compute_diff},
  error::DiffError,
  identity::Pk,
  projection::{Projection, ProjectionInput, project},
  snapshot::{LatestPair, NewSnapshot, Snapshot, SnapshotId},
  store::AuditStore,
  verification::{Resolution, VerificationEntry},
  views::{RelationshipView, relationship_view},
};

/// A computed diff plus the number of verification entries it created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffOutcome {
  pub diff:     DiffResult,
  pub enqueued: usize,
}

/// Result of [`record_snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOutcome {
  pub snapshot_id: SnapshotId,
  /// `None` when this is the first snapshot and there is nothing to compare.
  pub diff:        Option<DiffOutcome>,
}

fn store_err<E: Into<Error>>(e: E) -> Error { e.into() }

/// Persist `input`, then diff the two most recent snapshots if there are two.
pub async fn record_snapshot<S: AuditStore>(
  store: &S,
  input: NewSnapshot,
) -> Result<RecordOutcome> {
  let followers = input.followers.len();
  let following = input.following.len();
  let snapshot_id = store.create_snapshot(input).await.map_err(store_err)?;
  info!(snapshot_id, followers, following, "snapshot persisted");

  let diff = diff_latest(store).await?;
  Ok(RecordOutcome { snapshot_id, diff })
}

/// Diff the two most recent snapshots. Returns `None` when fewer than two
/// exist.
pub async fn diff_latest<S: AuditStore>(store: &S) -> Result<Option<DiffOutcome>> {
  match store.get_latest_snapshot_pair().await.map_err(store_err)? {
    LatestPair::Insufficient { snapshot_count } => {
      info!(snapshot_count, "not enough snapshots to diff");
      Ok(None)
    }
    LatestPair::Pair { old, new } => run_diff(store, &old, &new).await.map(Some),
  }
}

/// Diff two explicitly chosen snapshots.
pub async fn diff_snapshots<S: AuditStore>(
  store: &S,
  old_id: SnapshotId,
  new_id: SnapshotId,
) -> Result<DiffOutcome> {
  let old = load(store, old_id).await?;
  let new = load(store, new_id).await?;
  run_diff(store, &old, &new).await
}

async fn load<S: AuditStore>(store: &S, id: SnapshotId) -> Result<Snapshot> {
  store
    .get_snapshot(id)
    .await
    .map_err(store_err)?
    .ok_or_else(|| DiffError::SnapshotNotFound { id }.into())
}

async fn run_diff<S: AuditStore>(
  store: &S,
  old: &Snapshot,
  new: &Snapshot,
) -> Result<DiffOutcome> {
  let renames = store.rename_links().await.map_err(store_err)?;
  let diff = compute_diff(old, new, &renames)?;

  let entries = diff.missing_entries();
  let enqueued = if entries.is_empty() {
    0
  } else {
    store.enqueue_missing(entries).await.map_err(store_err)?
  };

  let s = diff.summary();
  info!(
    old = old.id,
    new = new.id,
    new_followers = s.new_followers,
    unfollowers = s.unfollowers,
    new_following = s.new_following,
    unfollowing = s.unfollowing,
    username_changes = s.username_changes,
    missing = s.missing,
    "diff computed"
  );
  debug!(enqueued, "verification entries created");

  Ok(DiffOutcome { diff, enqueued })
}

/// Apply a human decision to the pending entry for `pk`.
pub async fn resolve_missing<S: AuditStore>(
  store: &S,
  pk: Pk,
  resolution: Resolution,
) -> Result<VerificationEntry> {
  let status = resolution.status;
  match store.resolve(pk.clone(), resolution).await.map_err(store_err) {
    Ok(entry) => {
      info!(%pk, %status, entry_id = entry.id, "verification resolved");
      Ok(entry)
    }
    Err(e) => {
      warn!(%pk, %status, error = %e, "verification not resolved");
      Err(e)
    }
  }
}

/// Relationship view for `snapshot_id`, or for the most recent snapshot when
/// `None`. Returns `None` only when the store holds no snapshots; an explicit
/// id that does not exist is [`DiffError::SnapshotNotFound`].
pub async fn current_views<S: AuditStore>(
  store: &S,
  snapshot_id: Option<SnapshotId>,
) -> Result<Option<RelationshipView>> {
  let id = match snapshot_id {
    Some(id) => id,
    None => match latest_id(store).await? {
      Some(id) => id,
      None => return Ok(None),
    },
  };
  let snapshot = load(store, id).await?;
  Ok(Some(relationship_view(&snapshot)))
}

async fn latest_id<S: AuditStore>(store: &S) -> Result<Option<SnapshotId>> {
  let latest = store.list_snapshots(1).await.map_err(store_err)?;
  Ok(latest.first().map(|s| s.id))
}

/// Gather stored state and map it onto the sync/export [`Projection`].
///
/// Read-only: the latest diff is recomputed without touching the
/// verification queue.
pub async fn build_projection<S: AuditStore>(
  store: &S,
  snapshot_limit: usize,
) -> Result<Projection> {
  let snapshots = store.list_snapshots(snapshot_limit).await.map_err(store_err)?;
  let accounts = store.list_accounts().await.map_err(store_err)?;

  let (latest, latest_diff) =
    match store.get_latest_snapshot_pair().await.map_err(store_err)? {
      LatestPair::Pair { old, new } => {
        let renames = store.rename_links().await.map_err(store_err)?;
        let diff = compute_diff(&old, &new, &renames)?;
        (Some(new), Some(diff))
      }
      LatestPair::Insufficient { .. } => {
        let latest = match latest_id(store).await? {
          Some(id) => store.get_snapshot(id).await.map_err(store_err)?,
          None => None,
        };
        (latest, None)
      }
    };

  project(ProjectionInput {
    snapshots:   &snapshots,
    accounts:    &accounts,
    latest:      latest.as_ref(),
    latest_diff: latest_diff.as_ref(),
  })
}
