//! Verification queue types and the resolution state machine.
//!
//! An account that vanishes between two snapshots gets a `pending` entry. A
//! human later resolves it exactly once into a terminal status. Resolved
//! entries are never re-opened; if the account vanishes again a fresh pending
//! entry is created instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  error::TransitionError,
  identity::{AccountIdentity, Pk},
  snapshot::SnapshotId,
};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationStatus {
  Pending,
  /// The account blocked the user.
  Blocked,
  /// The account was deactivated or deleted.
  Deactivated,
  /// The account changed its username; see the entry's `new_username`.
  Renamed,
  /// The relationship ended deliberately.
  Unfollowed,
  Unknown,
}

impl VerificationStatus {
  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A pending or resolved classification for one missing account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationEntry {
  pub id:                        i64,
  /// The account as last observed before it went missing.
  pub account:                   AccountIdentity,
  pub snapshot_last_seen_id:     SnapshotId,
  pub snapshot_first_missing_id: SnapshotId,
  pub status:                    VerificationStatus,
  pub notes:                     Option<String>,
  /// Set only when `status` is [`VerificationStatus::Renamed`].
  pub new_username:              Option<String>,
  pub created_at:                DateTime<Utc>,
  pub resolved_at:               Option<DateTime<Utc>>,
}

/// Input to [`crate::store::AuditStore::enqueue_missing`].
#[derive(Debug, Clone)]
pub struct NewVerificationEntry {
  pub account:                   AccountIdentity,
  pub snapshot_last_seen_id:     SnapshotId,
  pub snapshot_first_missing_id: SnapshotId,
}

/// Cross-link recorded when a missing account is confirmed as renamed.
///
/// Under the username-derived strategy the old `pk` is abandoned; the link lets
/// consumers merge the two identities' history for display without touching
/// any snapshot membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameLink {
  pub id:              i64,
  pub old_pk:          Pk,
  pub new_username:    String,
  /// The username-derived pk the renamed account will appear under.
  pub new_pk:          Pk,
  pub verification_id: i64,
  pub recorded_at:     DateTime<Utc>,
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// A human decision about a pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
  pub status:       VerificationStatus,
  pub notes:        Option<String>,
  pub new_username: Option<String>,
}

impl Resolution {
  pub fn new(status: VerificationStatus) -> Self {
    Self { status, notes: None, new_username: None }
  }

  pub fn renamed(new_username: impl Into<String>) -> Self {
    Self {
      status:       VerificationStatus::Renamed,
      notes:        None,
      new_username: Some(new_username.into()),
    }
  }

  pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
    self.notes = Some(notes.into());
    self
  }

  /// The trimmed new username, if one was supplied and is not blank.
  pub fn new_username(&self) -> Option<&str> {
    self
      .new_username
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
  }

  /// Validate the resolution on its own, independent of stored state.
  pub fn check(&self, pk: &Pk) -> Result<(), TransitionError> {
    if !self.status.is_terminal() {
      return Err(TransitionError::NotTerminal { pk: pk.clone() });
    }
    match (self.status, self.new_username()) {
      (VerificationStatus::Renamed, None) => {
        Err(TransitionError::MissingNewUsername { pk: pk.clone() })
      }
      (status, Some(_)) if status != VerificationStatus::Renamed => {
        Err(TransitionError::UnexpectedNewUsername { pk: pk.clone(), status })
      }
      _ => Ok(()),
    }
  }
}

/// Decide whether `resolution` may be applied to an entry currently in
/// `current`.
pub fn check_transition(
  pk: &Pk,
  entry_id: i64,
  current: VerificationStatus,
  resolution: &Resolution,
) -> Result<(), TransitionError> {
  if current.is_terminal() {
    return Err(TransitionError::AlreadyResolved {
      pk: pk.clone(),
      entry_id,
      status: current,
    });
  }
  resolution.check(pk)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use super::*;

  fn charlie() -> Pk { Pk::from_username("charlie") }

  #[test]
  fn status_string_forms_agree() {
    for status in [
      VerificationStatus::Pending,
      VerificationStatus::Blocked,
      VerificationStatus::Deactivated,
      VerificationStatus::Renamed,
      VerificationStatus::Unfollowed,
      VerificationStatus::Unknown,
    ] {
      let json = serde_json::to_string(&status).unwrap();
      assert_eq!(json, format!("\"{status}\""));
      assert_eq!(VerificationStatus::from_str(status.as_ref()).unwrap(), status);
    }
  }

  #[test]
  fn pending_to_terminal_is_allowed() {
    let r = Resolution::new(VerificationStatus::Blocked).with_notes("saw it");
    assert!(check_transition(&charlie(), 1, VerificationStatus::Pending, &r).is_ok());
  }

  #[test]
  fn terminal_entries_are_not_reopened() {
    let r = Resolution::new(VerificationStatus::Unknown);
    let err =
      check_transition(&charlie(), 9, VerificationStatus::Unfollowed, &r).unwrap_err();
    assert_eq!(err, TransitionError::AlreadyResolved {
      pk:       charlie(),
      entry_id: 9,
      status:   VerificationStatus::Unfollowed,
    });
  }

  #[test]
  fn renamed_requires_a_username() {
    let mut r = Resolution::new(VerificationStatus::Renamed);
    assert!(matches!(
      r.check(&charlie()),
      Err(TransitionError::MissingNewUsername { .. })
    ));
    r.new_username = Some("   ".into());
    assert!(matches!(
      r.check(&charlie()),
      Err(TransitionError::MissingNewUsername { .. })
    ));
    assert!(Resolution::renamed("charlie2").check(&charlie()).is_ok());
  }

  #[test]
  fn new_username_only_with_renamed() {
    let mut r = Resolution::new(VerificationStatus::Blocked);
    r.new_username = Some("charlie2".into());
    assert!(matches!(
      r.check(&charlie()),
      Err(TransitionError::UnexpectedNewUsername { status: VerificationStatus::Blocked, .. })
    ));
  }

  #[test]
  fn pending_is_not_a_resolution() {
    let r = Resolution::new(VerificationStatus::Pending);
    assert!(matches!(r.check(&charlie()), Err(TransitionError::NotTerminal { .. })));
  }
}
