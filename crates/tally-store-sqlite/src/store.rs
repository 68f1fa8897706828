//! [`SqliteStore`]: the SQLite implementation of [`AuditStore`].

use std::{collections::BTreeSet, path::Path};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, params};
use tracing::debug;

use tally_core::{
  identity::{AccountRecord, Pk, UsernameHistoryEntry},
  snapshot::{LatestPair, NewSnapshot, Snapshot, SnapshotId, SnapshotSummary},
  store::AuditStore,
  verification::{
    NewVerificationEntry, RenameLink, Resolution, VerificationEntry,
    check_transition,
  },
};

use crate::{
  Error, Result,
  encode::{
    MemberInput, RawAccountRow, RawHistoryRow, RawMember, RawRenameLinkRow,
    RawSnapshot, RawSnapshotRow, RawVerificationRow, VERIFICATION_COLUMNS,
    decode_status, encode_dt, encode_status,
  },
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A tally snapshot store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_owned();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    debug!(path = %path.display(), "store opened");
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let found: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?))
      .await?;

    if found > SCHEMA_VERSION {
      return Err(Error::UnsupportedSchema { found, supported: SCHEMA_VERSION });
    }

    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────
//
// Plain functions over a borrowed connection so they can run inside an open
// transaction as well as on their own.

const SNAPSHOT_COLUMNS: &str =
  "id, timestamp, source, follower_count, following_count";

fn snapshot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSnapshotRow> {
  Ok(RawSnapshotRow {
    id:              row.get(0)?,
    timestamp:       row.get(1)?,
    source:          row.get(2)?,
    follower_count:  row.get(3)?,
    following_count: row.get(4)?,
  })
}

fn load_members(
  conn: &rusqlite::Connection,
  table: &str,
  snapshot_id: SnapshotId,
) -> rusqlite::Result<Vec<RawMember>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT m.account_pk, m.username, a.full_name
     FROM {table} m
     JOIN accounts a ON a.pk = m.account_pk
     WHERE m.snapshot_id = ?1
     ORDER BY m.account_pk"
  ))?;
  stmt
    .query_map(params![snapshot_id], |row| {
      Ok(RawMember {
        pk:        row.get(0)?,
        username:  row.get(1)?,
        full_name: row.get(2)?,
      })
    })?
    .collect()
}

fn load_snapshot(
  conn: &rusqlite::Connection,
  id: SnapshotId,
) -> rusqlite::Result<Option<RawSnapshot>> {
  let row = conn
    .query_row(
      &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?1"),
      params![id],
      snapshot_row,
    )
    .optional()?;

  let Some(row) = row else { return Ok(None) };
  Ok(Some(RawSnapshot {
    followers: load_members(conn, "snapshot_followers", row.id)?,
    following: load_members(conn, "snapshot_following", row.id)?,
    row,
  }))
}

/// Insert or extend the account row for one observation at `observed_at`.
///
/// `first_seen`/`last_seen` only ever widen. The displayed username and name
/// are replaced only by an observation at least as recent as `last_seen`.
fn upsert_account(
  conn: &rusqlite::Connection,
  member: &MemberInput,
  observed_at: &str,
) -> rusqlite::Result<()> {
  conn
    .prepare_cached(
      "INSERT INTO accounts (pk, username, full_name, first_seen, last_seen)
       VALUES (?1, ?2, ?3, ?4, ?4)
       ON CONFLICT(pk) DO UPDATE SET
         username   = CASE WHEN excluded.last_seen >= accounts.last_seen
                           THEN excluded.username ELSE accounts.username END,
         full_name  = CASE WHEN excluded.last_seen >= accounts.last_seen
                           THEN excluded.full_name ELSE accounts.full_name END,
         first_seen = MIN(accounts.first_seen, excluded.first_seen),
         last_seen  = MAX(accounts.last_seen, excluded.last_seen)",
    )?
    .execute(params![member.pk, member.username, member.full_name, observed_at])?;
  Ok(())
}

/// Append to the username log unless the latest appended entry already
/// carries `username`. Returns whether a row was written.
fn append_history(
  conn: &rusqlite::Connection,
  pk: &str,
  username: &str,
  observed_at: &str,
) -> rusqlite::Result<bool> {
  let last: Option<String> = conn
    .prepare_cached(
      "SELECT username FROM username_history
       WHERE account_pk = ?1
       ORDER BY history_id DESC
       LIMIT 1",
    )?
    .query_row(params![pk], |r| r.get(0))
    .optional()?;

  if last.as_deref() == Some(username) {
    return Ok(false);
  }

  conn
    .prepare_cached(
      "INSERT INTO username_history (account_pk, username, observed_at)
       VALUES (?1, ?2, ?3)",
    )?
    .execute(params![pk, username, observed_at])?;
  Ok(true)
}

fn insert_members(
  conn: &rusqlite::Connection,
  table: &str,
  snapshot_id: SnapshotId,
  members: &[MemberInput],
) -> rusqlite::Result<()> {
  let mut stmt = conn.prepare(&format!(
    "INSERT INTO {table} (snapshot_id, account_pk, username) VALUES (?1, ?2, ?3)"
  ))?;
  for m in members {
    stmt.execute(params![snapshot_id, m.pk, m.username])?;
  }
  Ok(())
}

fn load_verification(
  conn: &rusqlite::Connection,
  id: i64,
) -> rusqlite::Result<RawVerificationRow> {
  conn.query_row(
    &format!("SELECT {VERIFICATION_COLUMNS} FROM verification_queue WHERE id = ?1"),
    params![id],
    RawVerificationRow::from_row,
  )
}

/// What the resolve transaction found for the requested pk.
enum ResolveRow {
  Resolved(RawVerificationRow),
  NoEntry,
  NotPending { id: i64, status: String },
}

// ─── AuditStore impl ─────────────────────────────────────────────────────────

impl AuditStore for SqliteStore {
  type Error = Error;

  // ── Snapshots ─────────────────────────────────────────────────────────────

  async fn create_snapshot(&self, input: NewSnapshot) -> Result<SnapshotId> {
    input.validate()?;

    let (followers, following) = input.resolve_lists();
    let followers: Vec<MemberInput> = followers.into_iter().map(Into::into).collect();
    let following: Vec<MemberInput> = following.into_iter().map(Into::into).collect();

    let timestamp  = encode_dt(input.timestamp);
    let created_at = encode_dt(Utc::now());
    let source     = input.source.trim().to_owned();

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // Timestamps order snapshots, so two with the same instant could
        // never be diffed against each other.
        let clash: Option<SnapshotId> = tx
          .query_row(
            "SELECT id FROM snapshots WHERE timestamp = ?1 LIMIT 1",
            params![timestamp],
            |r| r.get(0),
          )
          .optional()?;
        if let Some(existing) = clash {
          return Ok(Err(existing));
        }

        tx.execute(
          "INSERT INTO snapshots
             (timestamp, source, follower_count, following_count, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![
            timestamp,
            source,
            followers.len() as i64,
            following.len() as i64,
            created_at,
          ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        // Followers first, so an account on both lists takes its follower
        // username for the account row and the history log.
        let mut seen = BTreeSet::new();
        let mut appended = 0usize;
        for m in followers.iter().chain(following.iter()) {
          if seen.insert(m.pk.as_str()) {
            upsert_account(&tx, m, &timestamp)?;
            if append_history(&tx, &m.pk, &m.username, &timestamp)? {
              appended += 1;
            }
          }
        }

        insert_members(&tx, "snapshot_followers", snapshot_id, &followers)?;
        insert_members(&tx, "snapshot_following", snapshot_id, &following)?;

        tx.commit()?;
        Ok(Ok((snapshot_id, appended)))
      })
      .await?;

    let (id, appended) = written.map_err(|existing| {
      Error::Core(tally_core::Error::InvalidInput(format!(
        "snapshot {existing} already has timestamp {}",
        encode_dt(input.timestamp)
      )))
    })?;

    debug!(snapshot_id = id, history_appended = appended, "snapshot written");
    Ok(id)
  }

  async fn get_snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>> {
    let raw = self
      .conn
      .call(move |conn| Ok(load_snapshot(conn, id)?))
      .await?;

    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn get_latest_snapshot_pair(&self) -> Result<LatestPair> {
    let (count, raws) = self
      .conn
      .call(|conn| {
        let count: i64 =
          conn.query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))?;
        if count < 2 {
          return Ok((count, Vec::new()));
        }

        let ids: Vec<SnapshotId> = conn
          .prepare("SELECT id FROM snapshots ORDER BY timestamp DESC, id DESC LIMIT 2")?
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<_>>()?;

        let mut raws = Vec::with_capacity(2);
        for id in ids {
          raws.extend(load_snapshot(conn, id)?);
        }
        Ok((count, raws))
      })
      .await?;

    let mut snapshots = raws
      .into_iter()
      .map(RawSnapshot::into_snapshot)
      .collect::<Result<Vec<_>>>()?;

    match (snapshots.pop(), snapshots.pop()) {
      (Some(old), Some(new)) => Ok(LatestPair::Pair { old, new }),
      _ => Ok(LatestPair::Insufficient {
        snapshot_count: usize::try_from(count).unwrap_or(0),
      }),
    }
  }

  async fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotSummary>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawSnapshotRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
           ORDER BY timestamp DESC, id DESC
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(params![limit], snapshot_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSnapshotRow::into_summary).collect()
  }

  // ── Accounts ──────────────────────────────────────────────────────────────

  async fn get_account(&self, pk: Pk) -> Result<Option<AccountRecord>> {
    let pk_str = pk.encode();

    let raw: Option<RawAccountRow> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT pk, username, full_name, first_seen, last_seen
             FROM accounts WHERE pk = ?1",
            params![pk_str],
            |row| {
              Ok(RawAccountRow {
                pk:         row.get(0)?,
                username:   row.get(1)?,
                full_name:  row.get(2)?,
                first_seen: row.get(3)?,
                last_seen:  row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAccountRow::into_record).transpose()
  }

  async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
    let raws: Vec<RawAccountRow> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT pk, username, full_name, first_seen, last_seen
           FROM accounts ORDER BY pk",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawAccountRow {
              pk:         row.get(0)?,
              username:   row.get(1)?,
              full_name:  row.get(2)?,
              first_seen: row.get(3)?,
              last_seen:  row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    // `Pk` ordering differs from the text ordering of its encoding.
    let mut records = raws
      .into_iter()
      .map(RawAccountRow::into_record)
      .collect::<Result<Vec<_>>>()?;
    records.sort_by(|a, b| a.identity.pk.cmp(&b.identity.pk));
    Ok(records)
  }

  async fn append_username_history(
    &self,
    pk: Pk,
    username: String,
    observed_at: DateTime<Utc>,
  ) -> Result<bool> {
    let pk_str = pk.encode();
    let at_str = encode_dt(observed_at);

    let appended = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let appended = append_history(&tx, &pk_str, &username, &at_str)?;
        tx.commit()?;
        Ok(appended)
      })
      .await?;

    Ok(appended)
  }

  async fn username_history(&self, pk: Pk) -> Result<Vec<UsernameHistoryEntry>> {
    let pk_str = pk.encode();

    let raws: Vec<RawHistoryRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT account_pk, username, observed_at
           FROM username_history
           WHERE account_pk = ?1
           ORDER BY history_id",
        )?;
        let rows = stmt
          .query_map(params![pk_str], |row| {
            Ok(RawHistoryRow {
              pk:          row.get(0)?,
              username:    row.get(1)?,
              observed_at: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistoryRow::into_entry).collect()
  }

  // ── Verification queue ────────────────────────────────────────────────────

  async fn enqueue_missing(&self, entries: Vec<NewVerificationEntry>) -> Result<usize> {
    let created_at = encode_dt(Utc::now());

    let created = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut created = 0usize;
        {
          // Both unique indexes make this a no-op when the account already
          // has a pending entry or an entry for this same disappearance.
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO verification_queue (
               account_pk, username, full_name,
               snapshot_last_seen_id, snapshot_first_missing_id,
               status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
          )?;
          for e in &entries {
            created += stmt.execute(params![
              e.account.pk.encode(),
              e.account.username,
              e.account.full_name,
              e.snapshot_last_seen_id,
              e.snapshot_first_missing_id,
              created_at,
            ])?;
          }
        }
        tx.commit()?;
        Ok(created)
      })
      .await?;

    debug!(created, "verification entries enqueued");
    Ok(created)
  }

  async fn list_pending(&self) -> Result<Vec<VerificationEntry>> {
    let raws: Vec<RawVerificationRow> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT v.id, v.account_pk, v.username, v.full_name,
                  v.snapshot_last_seen_id, v.snapshot_first_missing_id,
                  v.status, v.notes, v.new_username, v.created_at, v.resolved_at
           FROM verification_queue v
           JOIN snapshots s ON s.id = v.snapshot_first_missing_id
           WHERE v.status = 'pending'
           ORDER BY s.timestamp, v.id",
        )?;
        let rows = stmt
          .query_map([], RawVerificationRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVerificationRow::into_entry).collect()
  }

  async fn verification_history(&self, pk: Pk) -> Result<Vec<VerificationEntry>> {
    let pk_str = pk.encode();

    let raws: Vec<RawVerificationRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {VERIFICATION_COLUMNS} FROM verification_queue
           WHERE account_pk = ?1
           ORDER BY id"
        ))?;
        let rows = stmt
          .query_map(params![pk_str], RawVerificationRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVerificationRow::into_entry).collect()
  }

  async fn resolve(&self, pk: Pk, resolution: Resolution) -> Result<VerificationEntry> {
    resolution.check(&pk)?;

    let pk_str       = pk.encode();
    let status_str   = encode_status(resolution.status);
    let notes        = resolution.notes.clone();
    let new_username = resolution.new_username().map(str::to_owned);
    let new_pk_str   = new_username.as_deref().map(|u| Pk::from_username(u).encode());
    let resolved_at  = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let pending: Option<i64> = tx
          .query_row(
            "SELECT id FROM verification_queue
             WHERE account_pk = ?1 AND status = 'pending'",
            params![pk_str],
            |r| r.get(0),
          )
          .optional()?;

        let Some(id) = pending else {
          let latest: Option<(i64, String)> = tx
            .query_row(
              "SELECT id, status FROM verification_queue
               WHERE account_pk = ?1
               ORDER BY id DESC
               LIMIT 1",
              params![pk_str],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
          return Ok(match latest {
            Some((id, status)) => ResolveRow::NotPending { id, status },
            None => ResolveRow::NoEntry,
          });
        };

        tx.execute(
          "UPDATE verification_queue
           SET status = ?1, notes = ?2, new_username = ?3, resolved_at = ?4
           WHERE id = ?5 AND status = 'pending'",
          params![status_str, notes, new_username, resolved_at, id],
        )?;

        if let (Some(new_username), Some(new_pk)) = (&new_username, &new_pk_str) {
          tx.execute(
            "INSERT INTO rename_links
               (old_pk, new_username, new_pk, verification_id, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![pk_str, new_username, new_pk, id, resolved_at],
          )?;
        }

        let row = load_verification(&tx, id)?;
        tx.commit()?;
        Ok(ResolveRow::Resolved(row))
      })
      .await?;

    match outcome {
      ResolveRow::Resolved(row) => row.into_entry(),
      ResolveRow::NoEntry => {
        Err(tally_core::TransitionError::NoEntry { pk }.into())
      }
      ResolveRow::NotPending { id, status } => {
        let status = decode_status(&status)?;
        check_transition(&pk, id, status, &resolution)?;
        // Unreachable for well-formed rows: the latest entry is terminal here.
        Err(
          tally_core::TransitionError::AlreadyResolved { pk, entry_id: id, status }
            .into(),
        )
      }
    }
  }

  async fn rename_links(&self) -> Result<Vec<RenameLink>> {
    let raws: Vec<RawRenameLinkRow> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, old_pk, new_username, new_pk, verification_id, recorded_at
           FROM rename_links ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawRenameLinkRow {
              id:              row.get(0)?,
              old_pk:          row.get(1)?,
              new_username:    row.get(2)?,
              new_pk:          row.get(3)?,
              verification_id: row.get(4)?,
              recorded_at:     row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRenameLinkRow::into_link).collect()
  }
}
