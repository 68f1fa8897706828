//! The `AuditStore` trait: durable persistence of snapshots, accounts,
//! username history and the verification queue.
//!
//! Implemented by storage backends (e.g. `tally-store-sqlite`). The workflow
//! functions in [`crate::audit`] and the CLI depend on this abstraction, not on
//! any concrete backend. A store handle is opened once by the caller and passed
//! explicitly to every operation.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  identity::{AccountRecord, Pk, UsernameHistoryEntry},
  snapshot::{LatestPair, NewSnapshot, Snapshot, SnapshotId, SnapshotSummary},
  verification::{NewVerificationEntry, RenameLink, Resolution, VerificationEntry},
};

/// Abstraction over a snapshot store backend.
///
/// Snapshot membership and the username log are append-only. The only
/// mutation the store ever performs on existing data is extending an
/// account's `first_seen`/`last_seen` span and resolving a pending
/// verification entry.
///
/// The error type converts into [`crate::Error`] without losing its
/// classification, so store failures surface as `StorageError` while
/// validation and transition failures keep their own variants.
pub trait AuditStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static + Into<crate::Error>;

  // ── Snapshots ─────────────────────────────────────────────────────────

  /// Persist a snapshot atomically and return its newly assigned id.
  ///
  /// Every account is inserted if unseen, or has its `last_seen` extended and
  /// its username history appended if seen. Membership rows are written for
  /// both lists. Either everything becomes visible or nothing does. A
  /// timestamp already held by another snapshot is rejected as invalid input.
  fn create_snapshot(
    &self,
    input: NewSnapshot,
  ) -> impl Future<Output = Result<SnapshotId, Self::Error>> + Send + '_;

  /// Load a snapshot with its membership. Returns `None` if not found.
  fn get_snapshot(
    &self,
    id: SnapshotId,
  ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send + '_;

  /// The two most recent snapshots by timestamp, or
  /// [`LatestPair::Insufficient`] when fewer than two exist.
  fn get_latest_snapshot_pair(
    &self,
  ) -> impl Future<Output = Result<LatestPair, Self::Error>> + Send + '_;

  /// Snapshot summaries, most recent first.
  fn list_snapshots(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SnapshotSummary>, Self::Error>> + Send + '_;

  // ── Accounts ──────────────────────────────────────────────────────────

  /// Retrieve an account by `pk`. Returns `None` if it was never observed.
  fn get_account(
    &self,
    pk: Pk,
  ) -> impl Future<Output = Result<Option<AccountRecord>, Self::Error>> + Send + '_;

  /// All accounts ever observed, sorted by `pk`.
  fn list_accounts(
    &self,
  ) -> impl Future<Output = Result<Vec<AccountRecord>, Self::Error>> + Send + '_;

  /// Append `(pk, username, observed_at)` to the username log unless the most
  /// recently appended entry for `pk` already carries `username`.
  ///
  /// Returns `true` if a row was appended.
  fn append_username_history(
    &self,
    pk: Pk,
    username: String,
    observed_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The username log for `pk`, in append order.
  fn username_history(
    &self,
    pk: Pk,
  ) -> impl Future<Output = Result<Vec<UsernameHistoryEntry>, Self::Error>> + Send + '_;

  // ── Verification queue ────────────────────────────────────────────────

  /// Add a `pending` entry for each account that has neither a pending entry
  /// nor any entry for the same disappearance. Returns the number created.
  fn enqueue_missing(
    &self,
    entries: Vec<NewVerificationEntry>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Pending entries, ordered by the timestamp of the first-missing snapshot.
  fn list_pending(
    &self,
  ) -> impl Future<Output = Result<Vec<VerificationEntry>, Self::Error>> + Send + '_;

  /// Every entry ever created for `pk`, oldest first.
  fn verification_history(
    &self,
    pk: Pk,
  ) -> impl Future<Output = Result<Vec<VerificationEntry>, Self::Error>> + Send + '_;

  /// Resolve the pending entry for `pk`.
  ///
  /// Fails with an invalid-transition error if there is no pending entry or
  /// the resolution itself is malformed. Resolving as renamed also records a
  /// [`RenameLink`] in the same transaction.
  fn resolve(
    &self,
    pk: Pk,
    resolution: Resolution,
  ) -> impl Future<Output = Result<VerificationEntry, Self::Error>> + Send + '_;

  /// All confirmed rename links, in the order they were recorded.
  fn rename_links(
    &self,
  ) -> impl Future<Output = Result<Vec<RenameLink>, Self::Error>> + Send + '_;
}
