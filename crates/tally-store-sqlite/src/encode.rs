//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC strings with
//! microsecond precision, so `ORDER BY` on the text column is chronological.
//! `Pk`s are stored in their canonical string encoding.

use std::{collections::BTreeSet, str::FromStr};

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use tally_core::{
  identity::{AccountIdentity, AccountRecord, Pk, UsernameHistoryEntry},
  snapshot::{Snapshot, SnapshotId, SnapshotSummary},
  verification::{RenameLink, VerificationEntry, VerificationStatus},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Sub-microsecond precision is truncated, never rounded.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.trunc_subsecs(6).to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── VerificationStatus ──────────────────────────────────────────────────────

pub fn encode_status(status: VerificationStatus) -> &'static str {
  status.into()
}

pub fn decode_status(s: &str) -> Result<VerificationStatus> {
  VerificationStatus::from_str(s).map_err(|_| Error::UnknownStatus(s.to_owned()))
}

// ─── Counts ──────────────────────────────────────────────────────────────────

fn decode_count(n: i64) -> usize { usize::try_from(n).unwrap_or(0) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// One resolved account ready to be written as an account + membership row.
pub struct MemberInput {
  pub pk:        String,
  pub username:  String,
  pub full_name: Option<String>,
}

impl From<AccountIdentity> for MemberInput {
  fn from(a: AccountIdentity) -> Self {
    Self { pk: a.pk.encode(), username: a.username, full_name: a.full_name }
  }
}

/// A membership row joined with the account's display name.
pub struct RawMember {
  pub pk:        String,
  pub username:  String,
  pub full_name: Option<String>,
}

impl RawMember {
  pub fn into_identity(self) -> AccountIdentity {
    AccountIdentity {
      pk:        Pk::decode(&self.pk),
      username:  self.username,
      full_name: self.full_name,
    }
  }
}

/// Raw strings read from a `snapshots` row.
pub struct RawSnapshotRow {
  pub id:              SnapshotId,
  pub timestamp:       String,
  pub source:          String,
  pub follower_count:  i64,
  pub following_count: i64,
}

impl RawSnapshotRow {
  pub fn into_summary(self) -> Result<SnapshotSummary> {
    Ok(SnapshotSummary {
      id:              self.id,
      timestamp:       decode_dt(&self.timestamp)?,
      source:          self.source,
      follower_count:  decode_count(self.follower_count),
      following_count: decode_count(self.following_count),
    })
  }
}

/// A `snapshots` row plus both membership lists.
pub struct RawSnapshot {
  pub row:       RawSnapshotRow,
  pub followers: Vec<RawMember>,
  pub following: Vec<RawMember>,
}

impl RawSnapshot {
  pub fn into_snapshot(self) -> Result<Snapshot> {
    let members = |rows: Vec<RawMember>| -> BTreeSet<AccountIdentity> {
      rows.into_iter().map(RawMember::into_identity).collect()
    };
    Ok(Snapshot {
      id:        self.row.id,
      timestamp: decode_dt(&self.row.timestamp)?,
      source:    self.row.source,
      followers: members(self.followers),
      following: members(self.following),
    })
  }
}

/// Raw strings read from an `accounts` row.
pub struct RawAccountRow {
  pub pk:         String,
  pub username:   String,
  pub full_name:  Option<String>,
  pub first_seen: String,
  pub last_seen:  String,
}

impl RawAccountRow {
  pub fn into_record(self) -> Result<AccountRecord> {
    Ok(AccountRecord {
      identity:   AccountIdentity {
        pk:        Pk::decode(&self.pk),
        username:  self.username,
        full_name: self.full_name,
      },
      first_seen: decode_dt(&self.first_seen)?,
      last_seen:  decode_dt(&self.last_seen)?,
    })
  }
}

/// Raw strings read from a `username_history` row.
pub struct RawHistoryRow {
  pub pk:          String,
  pub username:    String,
  pub observed_at: String,
}

impl RawHistoryRow {
  pub fn into_entry(self) -> Result<UsernameHistoryEntry> {
    Ok(UsernameHistoryEntry {
      pk:          Pk::decode(&self.pk),
      username:    self.username,
      observed_at: decode_dt(&self.observed_at)?,
    })
  }
}

/// Raw strings read from a `verification_queue` row.
pub struct RawVerificationRow {
  pub id:                        i64,
  pub pk:                        String,
  pub username:                  String,
  pub full_name:                 Option<String>,
  pub snapshot_last_seen_id:     SnapshotId,
  pub snapshot_first_missing_id: SnapshotId,
  pub status:                    String,
  pub notes:                     Option<String>,
  pub new_username:              Option<String>,
  pub created_at:                String,
  pub resolved_at:               Option<String>,
}

/// Column list matching [`RawVerificationRow::from_row`].
pub const VERIFICATION_COLUMNS: &str = "id, account_pk, username, full_name, \
   snapshot_last_seen_id, snapshot_first_missing_id, status, notes, \
   new_username, created_at, resolved_at";

impl RawVerificationRow {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                        row.get(0)?,
      pk:                        row.get(1)?,
      username:                  row.get(2)?,
      full_name:                 row.get(3)?,
      snapshot_last_seen_id:     row.get(4)?,
      snapshot_first_missing_id: row.get(5)?,
      status:                    row.get(6)?,
      notes:                     row.get(7)?,
      new_username:              row.get(8)?,
      created_at:                row.get(9)?,
      resolved_at:               row.get(10)?,
    })
  }

  pub fn into_entry(self) -> Result<VerificationEntry> {
    Ok(VerificationEntry {
      id:                        self.id,
      account:                   AccountIdentity {
        pk:        Pk::decode(&self.pk),
        username:  self.username,
        full_name: self.full_name,
      },
      snapshot_last_seen_id:     self.snapshot_last_seen_id,
      snapshot_first_missing_id: self.snapshot_first_missing_id,
      status:                    decode_status(&self.status)?,
      notes:                     self.notes,
      new_username:              self.new_username,
      created_at:                decode_dt(&self.created_at)?,
      resolved_at:               decode_opt_dt(self.resolved_at.as_deref())?,
    })
  }
}

/// Raw strings read from a `rename_links` row.
pub struct RawRenameLinkRow {
  pub id:              i64,
  pub old_pk:          String,
  pub new_username:    String,
  pub new_pk:          String,
  pub verification_id: i64,
  pub recorded_at:     String,
}

impl RawRenameLinkRow {
  pub fn into_link(self) -> Result<RenameLink> {
    Ok(RenameLink {
      id:              self.id,
      old_pk:          Pk::decode(&self.old_pk),
      new_username:    self.new_username,
      new_pk:          Pk::decode(&self.new_pk),
      verification_id: self.verification_id,
      recorded_at:     decode_dt(&self.recorded_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let b = a + chrono::Duration::microseconds(1);
    let c = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert!(ea < eb && eb < ec);
    assert_eq!(ea.len(), ec.len());
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn sub_microsecond_precision_is_truncated() {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let fine = base + chrono::Duration::nanoseconds(1_999);
    assert_eq!(encode_dt(fine), "2024-01-01T00:00:00.000001Z");
    assert_eq!(
      decode_dt(&encode_dt(fine)).unwrap(),
      base + chrono::Duration::microseconds(1)
    );
  }

  #[test]
  fn status_round_trips() {
    for s in ["pending", "blocked", "deactivated", "renamed", "unfollowed", "unknown"] {
      assert_eq!(encode_status(decode_status(s).unwrap()), s);
    }
    assert!(matches!(decode_status("gone"), Err(Error::UnknownStatus(_))));
  }
}
