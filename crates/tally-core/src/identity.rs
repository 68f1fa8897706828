//! Account identity: how one account is referenced across snapshots.
//!
//! Most ingestion sources never expose a platform-issued numeric ID, so the
//! identifier falls back to one derived from the lower-cased username. Under
//! that strategy a rename is indistinguishable from one account leaving and
//! another arriving. [`Pk`] keeps the two strategies apart in the type so the
//! ambiguity stays visible to every consumer.

use std::{
  cmp::Ordering,
  fmt,
  hash::{Hash, Hasher},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Prefix of the canonical encoding of a username-derived [`Pk`].
pub const USERNAME_PK_PREFIX: &str = "username:";

// ─── Pk ──────────────────────────────────────────────────────────────────────

/// The identifier used to equate the same account across snapshots.
///
/// Serialises as its canonical string: the stable ID verbatim, or
/// `username:<lower-cased username>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Pk {
  /// A platform-issued identifier that survives renames.
  Stable(String),
  /// Derived from the lower-cased username; changes whenever the username
  /// does.
  UsernameDerived(String),
}

impl Pk {
  /// The username-derived identifier for `username`.
  pub fn from_username(username: &str) -> Self {
    Self::UsernameDerived(username.trim().to_lowercase())
  }

  /// Decode the canonical string form. Never fails: anything without the
  /// username prefix is taken to be a stable identifier.
  pub fn decode(s: &str) -> Self {
    match s.strip_prefix(USERNAME_PK_PREFIX) {
      Some(name) => Self::UsernameDerived(name.to_owned()),
      None => Self::Stable(s.to_owned()),
    }
  }

  pub fn encode(&self) -> String { self.to_string() }

  /// Whether a rename of this account can be observed as a username change
  /// rather than as churn.
  pub fn is_stable(&self) -> bool { matches!(self, Self::Stable(_)) }
}

impl fmt::Display for Pk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Stable(id) => f.write_str(id),
      Self::UsernameDerived(name) => write!(f, "{USERNAME_PK_PREFIX}{name}"),
    }
  }
}

impl From<Pk> for String {
  fn from(pk: Pk) -> Self { pk.encode() }
}

impl From<String> for Pk {
  fn from(s: String) -> Self { Pk::decode(&s) }
}

// ─── AccountIdentity ─────────────────────────────────────────────────────────

/// One tracked account as observed at some point in time.
///
/// Equality, hashing and ordering consider `pk` only: the same `pk` under two
/// usernames is the same account at two points in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountIdentity {
  pub pk:        Pk,
  pub username:  String,
  pub full_name: Option<String>,
}

impl PartialEq for AccountIdentity {
  fn eq(&self, other: &Self) -> bool { self.pk == other.pk }
}

impl Eq for AccountIdentity {}

impl Hash for AccountIdentity {
  fn hash<H: Hasher>(&self, state: &mut H) { self.pk.hash(state); }
}

impl PartialOrd for AccountIdentity {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for AccountIdentity {
  fn cmp(&self, other: &Self) -> Ordering { self.pk.cmp(&other.pk) }
}

// ─── Ingestion tuple ─────────────────────────────────────────────────────────

/// An account exactly as an ingestion collaborator hands it over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccount {
  #[serde(default)]
  pub stable_id: Option<String>,
  pub username:  String,
  #[serde(default)]
  pub full_name: Option<String>,
}

impl RawAccount {
  /// Convenience constructor for an account with no stable ID.
  pub fn new(username: impl Into<String>) -> Self {
    Self { stable_id: None, username: username.into(), full_name: None }
  }

  /// Convenience constructor for an account with a platform-issued ID.
  pub fn with_stable_id(
    stable_id: impl Into<String>,
    username: impl Into<String>,
  ) -> Self {
    Self {
      stable_id: Some(stable_id.into()),
      username:  username.into(),
      full_name: None,
    }
  }
}

/// Canonicalise a raw tuple into an [`AccountIdentity`]. Never fails.
///
/// A blank stable ID counts as absent, in which case the `pk` is derived from
/// the lower-cased username.
pub fn resolve(raw: &RawAccount) -> AccountIdentity {
  let username = raw.username.trim().to_owned();
  let pk = match non_blank(raw.stable_id.as_deref()) {
    Some(id) => Pk::Stable(id.to_owned()),
    None => Pk::from_username(&username),
  };
  AccountIdentity {
    pk,
    username,
    full_name: non_blank(raw.full_name.as_deref()).map(str::to_owned),
  }
}

/// Reject tuples that cannot name an account. `list` and `index` locate the
/// offending entry for the error message.
pub fn validate_raw(list: &str, index: usize, raw: &RawAccount) -> Result<()> {
  if raw.username.trim().is_empty() {
    return Err(Error::InvalidInput(format!(
      "{list}[{index}] has a blank username"
    )));
  }
  Ok(())
}

fn non_blank(s: Option<&str>) -> Option<&str> {
  s.map(str::trim).filter(|s| !s.is_empty())
}

// ─── Stored records ──────────────────────────────────────────────────────────

/// The deduplicated account row: the latest identity plus the span over which
/// the account has been observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
  #[serde(flatten)]
  pub identity:   AccountIdentity,
  pub first_seen: DateTime<Utc>,
  pub last_seen:  DateTime<Utc>,
}

/// One row of the append-only username log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameHistoryEntry {
  pub pk:          Pk,
  pub username:    String,
  pub observed_at: DateTime<Utc>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
