//! Current relationship view for a single snapshot, computed on demand.

use serde::{Deserialize, Serialize};

use crate::{
  identity::AccountIdentity,
  snapshot::{Snapshot, SnapshotId},
};

/// Who follows whom back within one snapshot. Members are sorted by `pk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipView {
  pub snapshot_id:        SnapshotId,
  /// In both followers and following.
  pub mutuals:            Vec<AccountIdentity>,
  /// Follows the user; the user does not follow them.
  pub not_following_back: Vec<AccountIdentity>,
  /// Followed by the user; they do not follow back.
  pub not_followed_back:  Vec<AccountIdentity>,
}

pub fn relationship_view(snapshot: &Snapshot) -> RelationshipView {
  let followers = &snapshot.followers;
  let following = &snapshot.following;
  RelationshipView {
    snapshot_id:        snapshot.id,
    mutuals:            followers.intersection(following).cloned().collect(),
    not_following_back: followers.difference(following).cloned().collect(),
    not_followed_back:  following.difference(followers).cloned().collect(),
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::identity::{RawAccount, resolve};

  #[test]
  fn partitions_the_union() {
    let set = |names: &[&str]| -> BTreeSet<AccountIdentity> {
      names.iter().map(|n| resolve(&RawAccount::new(*n))).collect()
    };
    let snapshot = Snapshot {
      id:        2,
      timestamp: Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
      source:    "export".into(),
      followers: set(&["alice", "bob_new", "eve"]),
      following: set(&["alice", "eve", "zed"]),
    };

    let view = relationship_view(&snapshot);
    let names = |v: &[AccountIdentity]| {
      v.iter().map(|a| a.username.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&view.mutuals), ["alice", "eve"]);
    assert_eq!(names(&view.not_following_back), ["bob_new"]);
    assert_eq!(names(&view.not_followed_back), ["zed"]);
    assert_eq!(view.snapshot_id, 2);
  }
}
