//! Snapshot diff: two snapshots → the structured set of changes between them.
//!
//! The computation is pure set algebra over `pk`s with no fuzzy matching. All
//! result sequences are sorted by `pk`, so identical inputs always produce
//! identical output.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  error::DiffError,
  identity::{AccountIdentity, Pk},
  snapshot::{Snapshot, SnapshotId},
  verification::{NewVerificationEntry, RenameLink},
};

/// An account whose `pk` appears in both snapshots under different usernames.
/// Only possible for [`Pk::Stable`] identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameChange {
  pub pk:           Pk,
  pub old_username: String,
  pub new_username: String,
}

/// The result of comparing an older snapshot against a newer one. Derived,
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
  pub old_snapshot_id:  SnapshotId,
  pub new_snapshot_id:  SnapshotId,
  pub old_timestamp:    DateTime<Utc>,
  pub new_timestamp:    DateTime<Utc>,
  pub new_followers:    Vec<AccountIdentity>,
  pub unfollowers:      Vec<AccountIdentity>,
  pub new_following:    Vec<AccountIdentity>,
  pub unfollowing:      Vec<AccountIdentity>,
  pub username_changes: Vec<UsernameChange>,
  /// Accounts that left the old snapshot and cannot be found anywhere in the
  /// new one; each needs a human decision.
  pub missing:          Vec<AccountIdentity>,
}

/// Counts for one-line rendering of a [`DiffResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
  pub new_followers:    usize,
  pub unfollowers:      usize,
  pub new_following:    usize,
  pub unfollowing:      usize,
  pub username_changes: usize,
  pub missing:          usize,
}

impl DiffResult {
  pub fn summary(&self) -> DiffSummary {
    DiffSummary {
      new_followers:    self.new_followers.len(),
      unfollowers:      self.unfollowers.len(),
      new_following:    self.new_following.len(),
      unfollowing:      self.unfollowing.len(),
      username_changes: self.username_changes.len(),
      missing:          self.missing.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.new_followers.is_empty()
      && self.unfollowers.is_empty()
      && self.new_following.is_empty()
      && self.unfollowing.is_empty()
      && self.username_changes.is_empty()
  }

  /// One pending verification entry per missing account.
  pub fn missing_entries(&self) -> Vec<NewVerificationEntry> {
    self
      .missing
      .iter()
      .map(|account| NewVerificationEntry {
        account:                   account.clone(),
        snapshot_last_seen_id:     self.old_snapshot_id,
        snapshot_first_missing_id: self.new_snapshot_id,
      })
      .collect()
  }
}

/// Compare `old` against `new`.
///
/// `renames` are previously confirmed rename links; an account whose link
/// points at a `pk` present in `new` is considered explained and is not
/// reported as missing.
pub fn compute_diff(
  old: &Snapshot,
  new: &Snapshot,
  renames: &[RenameLink],
) -> Result<DiffResult, DiffError> {
  if old.id == new.id {
    return Err(DiffError::SameSnapshot { id: old.id });
  }
  if old.timestamp >= new.timestamp {
    return Err(DiffError::Unordered {
      old_id:        old.id,
      old_timestamp: old.timestamp,
      new_id:        new.id,
      new_timestamp: new.timestamp,
    });
  }

  let new_followers: Vec<_> =
    new.followers.difference(&old.followers).cloned().collect();
  let unfollowers: Vec<_> =
    old.followers.difference(&new.followers).cloned().collect();
  let new_following: Vec<_> =
    new.following.difference(&old.following).cloned().collect();
  let unfollowing: Vec<_> =
    old.following.difference(&new.following).cloned().collect();

  let username_changes = username_changes(old, new);

  let new_pks: BTreeSet<&Pk> = new
    .followers
    .iter()
    .chain(new.following.iter())
    .map(|a| &a.pk)
    .collect();

  // Follower entries are inserted first so they win over following entries.
  let departed: BTreeSet<&AccountIdentity> =
    unfollowers.iter().chain(unfollowing.iter()).collect();

  let missing = departed
    .into_iter()
    .filter(|a| !new_pks.contains(&a.pk))
    .filter(|a| {
      !renames
        .iter()
        .any(|link| link.old_pk == a.pk && new_pks.contains(&link.new_pk))
    })
    .cloned()
    .collect();

  Ok(DiffResult {
    old_snapshot_id: old.id,
    new_snapshot_id: new.id,
    old_timestamp: old.timestamp,
    new_timestamp: new.timestamp,
    new_followers,
    unfollowers,
    new_following,
    unfollowing,
    username_changes,
    missing,
  })
}

/// Accounts present on both sides whose recorded username differs.
fn username_changes(old: &Snapshot, new: &Snapshot) -> Vec<UsernameChange> {
  let old_all: BTreeSet<&AccountIdentity> =
    old.followers.iter().chain(old.following.iter()).collect();

  old_all
    .into_iter()
    .filter_map(|before| {
      let before = old.find(before)?;
      let after = new.find(before)?;
      (before.username != after.username).then(|| UsernameChange {
        pk:           before.pk.clone(),
        old_username: before.username.clone(),
        new_username: after.username.clone(),
      })
    })
    .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::identity::{RawAccount, resolve};

  fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
  }

  fn accounts(raws: &[RawAccount]) -> BTreeSet<AccountIdentity> {
    raws.iter().map(resolve).collect()
  }

  fn named(names: &[&str]) -> Vec<RawAccount> {
    names.iter().map(|n| RawAccount::new(*n)).collect()
  }

  fn snap(
    id: SnapshotId,
    d: u32,
    followers: &[RawAccount],
    following: &[RawAccount],
  ) -> Snapshot {
    Snapshot {
      id,
      timestamp: day(d),
      source: "export".into(),
      followers: accounts(followers),
      following: accounts(following),
    }
  }

  fn usernames(list: &[AccountIdentity]) -> Vec<&str> {
    list.iter().map(|a| a.username.as_str()).collect()
  }

  fn scenario_a() -> (Snapshot, Snapshot) {
    (
      snap(1, 1, &named(&["alice", "bob", "charlie"]), &named(&["alice", "frank"])),
      snap(2, 8, &named(&["alice", "bob", "dave"]), &named(&["alice", "dave"])),
    )
  }

  #[test]
  fn scenario_a_changes_and_missing() {
    let (old, new) = scenario_a();
    let diff = compute_diff(&old, &new, &[]).unwrap();

    assert_eq!(usernames(&diff.new_followers), ["dave"]);
    assert_eq!(usernames(&diff.unfollowers), ["charlie"]);
    assert_eq!(usernames(&diff.new_following), ["dave"]);
    assert_eq!(usernames(&diff.unfollowing), ["frank"]);
    assert_eq!(usernames(&diff.missing), ["charlie", "frank"]);
    assert!(diff.username_changes.is_empty());

    let entries = diff.missing_entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.snapshot_last_seen_id == 1
      && e.snapshot_first_missing_id == 2));
  }

  #[test]
  fn identical_inputs_give_identical_output() {
    let (old, new) = scenario_a();
    let a = compute_diff(&old, &new, &[]).unwrap();
    let b = compute_diff(&old, &new, &[]).unwrap();
    assert_eq!(a, b);
    assert_eq!(
      serde_json::to_string(&a).unwrap(),
      serde_json::to_string(&b).unwrap()
    );
  }

  #[test]
  fn set_algebra_identities_hold() {
    let (old, new) = scenario_a();
    let diff = compute_diff(&old, &new, &[]).unwrap();

    let gained: BTreeSet<_> = diff.new_followers.iter().cloned().collect();
    let lost: BTreeSet<_> = diff.unfollowers.iter().cloned().collect();
    assert!(gained.is_disjoint(&lost));

    let rebuilt: BTreeSet<_> = old
      .followers
      .difference(&lost)
      .cloned()
      .chain(gained.iter().cloned())
      .collect();
    assert_eq!(rebuilt, new.followers);
  }

  #[test]
  fn stable_id_rename_is_a_username_change() {
    let old = snap(1, 1, &[RawAccount::with_stable_id("123", "old_name")], &[]);
    let new = snap(2, 8, &[RawAccount::with_stable_id("123", "new_name")], &[]);
    let diff = compute_diff(&old, &new, &[]).unwrap();

    assert_eq!(diff.username_changes, vec![UsernameChange {
      pk:           Pk::Stable("123".into()),
      old_username: "old_name".into(),
      new_username: "new_name".into(),
    }]);
    assert!(diff.new_followers.is_empty());
    assert!(diff.unfollowers.is_empty());
    assert!(diff.missing.is_empty());
  }

  #[test]
  fn derived_id_rename_looks_like_churn() {
    let old = snap(1, 1, &named(&["charlie"]), &[]);
    let new = snap(2, 8, &named(&["charlie2"]), &[]);
    let diff = compute_diff(&old, &new, &[]).unwrap();

    assert!(diff.username_changes.is_empty());
    assert_eq!(usernames(&diff.new_followers), ["charlie2"]);
    assert_eq!(usernames(&diff.missing), ["charlie"]);
  }

  #[test]
  fn confirmed_rename_is_not_missing() {
    let old = snap(1, 1, &named(&["charlie"]), &[]);
    let new = snap(2, 8, &named(&["charlie2"]), &[]);
    let link = RenameLink {
      id:              1,
      old_pk:          Pk::from_username("charlie"),
      new_username:    "charlie2".into(),
      new_pk:          Pk::from_username("charlie2"),
      verification_id: 1,
      recorded_at:     day(9),
    };
    let diff = compute_diff(&old, &new, std::slice::from_ref(&link)).unwrap();
    assert!(diff.missing.is_empty());
    assert_eq!(usernames(&diff.unfollowers), ["charlie"]);

    // A link whose target is absent explains nothing.
    let elsewhere = snap(3, 9, &named(&["erin"]), &[]);
    let diff = compute_diff(&old, &elsewhere, &[link]).unwrap();
    assert_eq!(usernames(&diff.missing), ["charlie"]);
  }

  #[test]
  fn moving_between_lists_is_not_missing() {
    let old = snap(1, 1, &named(&["gina"]), &[]);
    let new = snap(2, 8, &[], &named(&["gina"]));
    let diff = compute_diff(&old, &new, &[]).unwrap();
    assert_eq!(usernames(&diff.unfollowers), ["gina"]);
    assert_eq!(usernames(&diff.new_following), ["gina"]);
    assert!(diff.missing.is_empty());
  }

  #[test]
  fn rename_in_both_lists_is_reported_once() {
    let id = RawAccount::with_stable_id("789", "old_name");
    let renamed = RawAccount::with_stable_id("789", "new_name");
    let old = snap(1, 1, &[id.clone()], &[id]);
    let new = snap(2, 8, &[renamed.clone()], &[renamed]);
    let diff = compute_diff(&old, &new, &[]).unwrap();
    assert_eq!(diff.username_changes.len(), 1);
    assert!(!diff.is_empty());
    assert_eq!(diff.summary().username_changes, 1);
  }

  #[test]
  fn unordered_snapshots_are_rejected() {
    let (old, new) = scenario_a();
    let err = compute_diff(&new, &old, &[]).unwrap_err();
    assert_eq!(err, DiffError::Unordered {
      old_id:        2,
      old_timestamp: day(8),
      new_id:        1,
      new_timestamp: day(1),
    });

    let same_time = snap(3, 8, &[], &[]);
    assert!(matches!(
      compute_diff(&new, &same_time, &[]),
      Err(DiffError::Unordered { .. })
    ));
    assert_eq!(
      compute_diff(&old, &old, &[]).unwrap_err(),
      DiffError::SameSnapshot { id: 1 }
    );
  }

  #[test]
  fn empty_to_populated() {
    let old = snap(1, 1, &[], &[]);
    let new = snap(2, 8, &named(&["alice", "bob"]), &named(&["alice"]));
    let diff = compute_diff(&old, &new, &[]).unwrap();
    assert_eq!(diff.summary(), DiffSummary {
      new_followers:    2,
      unfollowers:      0,
      new_following:    1,
      unfollowing:      0,
      username_changes: 0,
      missing:          0,
    });
  }

  // ── Properties ────────────────────────────────────────────────────────────

  mod properties {
    use proptest::prelude::*;

    use super::*;

    /// Account `i` of a small universe: every third one has a stable id and
    /// may switch to a second username on the new side; the rest are
    /// username-derived.
    fn account(i: u8, renamed: bool) -> RawAccount {
      if i % 3 == 0 {
        let username = if renamed { format!("s{i}_b") } else { format!("s{i}") };
        RawAccount::with_stable_id(format!("{i}"), username)
      } else {
        RawAccount::new(format!("u{i}"))
      }
    }

    fn side(members: &BTreeSet<u8>, renamed: &BTreeSet<u8>) -> Vec<RawAccount> {
      members.iter().map(|&i| account(i, renamed.contains(&i))).collect()
    }

    fn members() -> impl Strategy<Value = BTreeSet<u8>> {
      prop::collection::btree_set(0u8..10, 0..8)
    }

    fn pks<'a>(list: impl IntoIterator<Item = &'a AccountIdentity>) -> BTreeSet<Pk> {
      list.into_iter().map(|a| a.pk.clone()).collect()
    }

    fn pair(
      old_followers: &BTreeSet<u8>,
      old_following: &BTreeSet<u8>,
      new_followers: &BTreeSet<u8>,
      new_following: &BTreeSet<u8>,
      renamed: &BTreeSet<u8>,
    ) -> (Snapshot, Snapshot) {
      let none = BTreeSet::new();
      (
        snap(1, 1, &side(old_followers, &none), &side(old_following, &none)),
        snap(2, 2, &side(new_followers, renamed), &side(new_following, renamed)),
      )
    }

    proptest! {
      #[test]
      fn changes_rebuild_the_new_lists(
        old_followers in members(),
        old_following in members(),
        new_followers in members(),
        new_following in members(),
        renamed in members(),
      ) {
        let (old, new) =
          pair(&old_followers, &old_following, &new_followers, &new_following, &renamed);
        let diff = compute_diff(&old, &new, &[]).unwrap();

        let (gained, lost) = (pks(&diff.new_followers), pks(&diff.unfollowers));
        prop_assert!(gained.is_disjoint(&lost));
        let rebuilt: BTreeSet<Pk> =
          pks(&old.followers).difference(&lost).cloned().chain(gained).collect();
        prop_assert_eq!(rebuilt, pks(&new.followers));

        let (gained, lost) = (pks(&diff.new_following), pks(&diff.unfollowing));
        prop_assert!(gained.is_disjoint(&lost));
        let rebuilt: BTreeSet<Pk> =
          pks(&old.following).difference(&lost).cloned().chain(gained).collect();
        prop_assert_eq!(rebuilt, pks(&new.following));

        for change in &diff.username_changes {
          prop_assert!(change.pk.is_stable());
          prop_assert_ne!(&change.old_username, &change.new_username);
        }
      }

      #[test]
      fn missing_accounts_left_and_are_gone(
        old_followers in members(),
        old_following in members(),
        new_followers in members(),
        new_following in members(),
        renamed in members(),
      ) {
        let (old, new) =
          pair(&old_followers, &old_following, &new_followers, &new_following, &renamed);
        let diff = compute_diff(&old, &new, &[]).unwrap();

        let departed: BTreeSet<Pk> =
          pks(&diff.unfollowers).union(&pks(&diff.unfollowing)).cloned().collect();
        let present: BTreeSet<Pk> =
          pks(&new.followers).union(&pks(&new.following)).cloned().collect();
        for account in &diff.missing {
          prop_assert!(departed.contains(&account.pk));
          prop_assert!(!present.contains(&account.pk));
        }
        prop_assert_eq!(diff.missing_entries().len(), diff.missing.len());
      }

      #[test]
      fn repeated_runs_serialize_identically(
        old_followers in members(),
        old_following in members(),
        new_followers in members(),
        new_following in members(),
        renamed in members(),
      ) {
        let (old, new) =
          pair(&old_followers, &old_following, &new_followers, &new_following, &renamed);
        let first = serde_json::to_vec(&compute_diff(&old, &new, &[]).unwrap()).unwrap();
        let second = serde_json::to_vec(&compute_diff(&old, &new, &[]).unwrap()).unwrap();
        prop_assert_eq!(first, second);
      }
    }
  }
}
