//! SQL schema for the tally SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema version; a database written by a newer version is refused.

/// The schema version this crate reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS snapshots (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp       TEXT    NOT NULL,   -- RFC 3339 UTC, fixed width
    source          TEXT    NOT NULL,
    follower_count  INTEGER NOT NULL,
    following_count INTEGER NOT NULL,
    created_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS snapshots_timestamp_idx ON snapshots(timestamp);

-- One row per pk, ever. Never deleted.
CREATE TABLE IF NOT EXISTS accounts (
    pk         TEXT PRIMARY KEY,   -- canonical Pk encoding
    username   TEXT NOT NULL,      -- latest observed
    full_name  TEXT,
    first_seen TEXT NOT NULL,
    last_seen  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS accounts_username_idx ON accounts(username);

-- Membership is append-only. `username` is the handle observed in that
-- snapshot, so old snapshots reload exactly as captured.
CREATE TABLE IF NOT EXISTS snapshot_followers (
    snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
    account_pk  TEXT    NOT NULL REFERENCES accounts(pk),
    username    TEXT    NOT NULL,
    PRIMARY KEY (snapshot_id, account_pk)
);

CREATE TABLE IF NOT EXISTS snapshot_following (
    snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
    account_pk  TEXT    NOT NULL REFERENCES accounts(pk),
    username    TEXT    NOT NULL,
    PRIMARY KEY (snapshot_id, account_pk)
);

-- Append-only username log.
CREATE TABLE IF NOT EXISTS username_history (
    history_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    account_pk  TEXT NOT NULL REFERENCES accounts(pk),
    username    TEXT NOT NULL,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS username_history_pk_idx ON username_history(account_pk);

CREATE TABLE IF NOT EXISTS verification_queue (
    id                        INTEGER PRIMARY KEY AUTOINCREMENT,
    account_pk                TEXT    NOT NULL REFERENCES accounts(pk),
    username                  TEXT    NOT NULL,   -- as last observed
    full_name                 TEXT,
    snapshot_last_seen_id     INTEGER NOT NULL REFERENCES snapshots(id),
    snapshot_first_missing_id INTEGER NOT NULL REFERENCES snapshots(id),
    status                    TEXT    NOT NULL DEFAULT 'pending',
    notes                     TEXT,
    new_username              TEXT,
    created_at                TEXT    NOT NULL,
    resolved_at               TEXT,
    CHECK (status IN ('pending', 'blocked', 'deactivated', 'renamed', 'unfollowed', 'unknown')),
    CHECK ((status = 'renamed') = (new_username IS NOT NULL))
);

-- At most one pending entry per account.
CREATE UNIQUE INDEX IF NOT EXISTS verification_queue_pending_idx
    ON verification_queue(account_pk) WHERE status = 'pending';
-- One entry per disappearance, whatever its status: re-diffing the same pair
-- never re-opens a decision.
CREATE UNIQUE INDEX IF NOT EXISTS verification_queue_disappearance_idx
    ON verification_queue(account_pk, snapshot_last_seen_id, snapshot_first_missing_id);
CREATE INDEX IF NOT EXISTS verification_queue_pk_idx ON verification_queue(account_pk);

-- Confirmed renames: the abandoned pk and the username it continued under.
CREATE TABLE IF NOT EXISTS rename_links (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    old_pk          TEXT    NOT NULL REFERENCES accounts(pk),
    new_username    TEXT    NOT NULL,
    new_pk          TEXT    NOT NULL,
    verification_id INTEGER NOT NULL REFERENCES verification_queue(id),
    recorded_at     TEXT    NOT NULL,
    UNIQUE (verification_id)
);
";
