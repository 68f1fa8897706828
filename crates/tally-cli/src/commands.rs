//! Subcommand handlers. Each one is a thin call into `tally_core::audit` or
//! the store, followed by JSON or a short text rendering.

use std::fmt::Write as _;

use anyhow::Context as _;
use serde::Serialize;
use tally_core::{
  audit::{
    DiffOutcome, build_projection, current_views, diff_latest, diff_snapshots,
    record_snapshot, resolve_missing,
  },
  identity::{AccountIdentity, Pk},
  snapshot::NewSnapshot,
  store::AuditStore,
  verification::{Resolution, VerificationEntry},
};
use tally_store_sqlite::SqliteStore;

use crate::{AccountArg, Command, settings::Settings};

pub async fn run(
  store: &SqliteStore,
  settings: &Settings,
  json: bool,
  command: Command,
) -> anyhow::Result<()> {
  match command {
    Command::Record { input } => {
      let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("reading snapshot file {}", input.display()))?;
      let snapshot: NewSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing snapshot file {}", input.display()))?;

      let outcome = record_snapshot(store, snapshot).await?;
      if json {
        return print_json(&outcome);
      }
      println!("recorded snapshot {}", outcome.snapshot_id);
      match &outcome.diff {
        Some(diff) => print!("{}", render_diff(diff)),
        None => println!("first snapshot; nothing to compare yet"),
      }
    }

    Command::Diff { old, new } => {
      let outcome = match (old, new) {
        (Some(old), Some(new)) => Some(diff_snapshots(store, old, new).await?),
        _ => diff_latest(store).await?,
      };
      if json {
        return print_json(&outcome);
      }
      match outcome {
        Some(diff) => print!("{}", render_diff(&diff)),
        None => println!("fewer than two snapshots; nothing to diff"),
      }
    }

    Command::Views { snapshot } => {
      let view = current_views(store, snapshot).await?;
      if json {
        return print_json(&view);
      }
      let Some(view) = view else {
        println!("no snapshots recorded yet");
        return Ok(());
      };
      println!("snapshot {}", view.snapshot_id);
      println!("  mutuals:            {}", names(&view.mutuals));
      println!("  not following back: {}", names(&view.not_following_back));
      println!("  not followed back:  {}", names(&view.not_followed_back));
    }

    Command::List { limit } => {
      let snapshots = store
        .list_snapshots(limit.unwrap_or(settings.list_limit))
        .await?;
      if json {
        return print_json(&snapshots);
      }
      for s in &snapshots {
        println!(
          "{:>5}  {}  {:<10}  {} followers, {} following",
          s.id,
          s.timestamp.format("%Y-%m-%d %H:%M:%S"),
          s.source,
          s.follower_count,
          s.following_count,
        );
      }
    }

    Command::Pending => {
      let pending = store.list_pending().await?;
      if json {
        return print_json(&pending);
      }
      if pending.is_empty() {
        println!("no pending verifications");
      }
      for entry in &pending {
        println!("{}", render_entry(entry));
      }
    }

    Command::Resolve { account, status, notes, new_username } => {
      let resolution = Resolution { status, notes, new_username };
      let entry = resolve_missing(store, account.pk()?, resolution).await?;
      if json {
        return print_json(&entry);
      }
      println!("{}", render_entry(&entry));
    }

    Command::History { account } => {
      let pk = account.pk()?;
      let usernames = store.username_history(pk.clone()).await?;
      let verifications = store.verification_history(pk.clone()).await?;
      if json {
        return print_json(&serde_json::json!({
          "pk": pk,
          "username_history": usernames,
          "verification_history": verifications,
        }));
      }
      println!("{pk}");
      for h in &usernames {
        println!("  {}  {}", h.observed_at.format("%Y-%m-%d"), h.username);
      }
      for entry in &verifications {
        println!("  {}", render_entry(entry));
      }
    }

    Command::Export { output } => {
      let projection = build_projection(store, settings.list_limit).await?;
      let body = serde_json::to_string_pretty(&projection)?;
      match output {
        Some(path) => std::fs::write(&path, body)
          .with_context(|| format!("writing projection to {}", path.display()))?,
        None => println!("{body}"),
      }
    }
  }
  Ok(())
}

impl AccountArg {
  fn pk(&self) -> anyhow::Result<Pk> {
    match (&self.pk, &self.username) {
      (Some(pk), _) => Ok(Pk::decode(pk.trim())),
      (None, Some(username)) => Ok(Pk::from_username(username)),
      (None, None) => anyhow::bail!("either --pk or --username is required"),
    }
  }
}

// ─── Rendering ────────────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn names(accounts: &[AccountIdentity]) -> String {
  if accounts.is_empty() {
    return "-".to_owned();
  }
  accounts
    .iter()
    .map(|a| a.username.as_str())
    .collect::<Vec<_>>()
    .join(", ")
}

fn render_diff(outcome: &DiffOutcome) -> String {
  let d = &outcome.diff;
  let mut out = String::new();
  let _ = writeln!(out, "diff {} -> {}", d.old_snapshot_id, d.new_snapshot_id);
  if d.is_empty() {
    let _ = writeln!(out, "  no changes");
    return out;
  }
  let _ = writeln!(out, "  new followers: {}", names(&d.new_followers));
  let _ = writeln!(out, "  unfollowers:   {}", names(&d.unfollowers));
  let _ = writeln!(out, "  new following: {}", names(&d.new_following));
  let _ = writeln!(out, "  unfollowing:   {}", names(&d.unfollowing));
  for c in &d.username_changes {
    let _ = writeln!(out, "  renamed: {} -> {} ({})", c.old_username, c.new_username, c.pk);
  }
  let _ = writeln!(
    out,
    "  missing: {} ({} queued for verification)",
    names(&d.missing),
    outcome.enqueued
  );
  out
}

fn render_entry(entry: &VerificationEntry) -> String {
  let mut line = format!(
    "#{} {} ({}) {} [last seen in {}, missing from {}]",
    entry.id,
    entry.account.username,
    entry.account.pk,
    entry.status,
    entry.snapshot_last_seen_id,
    entry.snapshot_first_missing_id,
  );
  if let Some(new_username) = &entry.new_username {
    let _ = write!(line, " now {new_username}");
  }
  if let Some(notes) = &entry.notes {
    let _ = write!(line, ": {notes}");
  }
  line
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use clap::Parser as _;
  use tally_core::{
    identity::{RawAccount, resolve},
    verification::VerificationStatus,
  };

  use super::*;
  use crate::Cli;

  #[test]
  fn account_arg_accepts_pk_or_username() {
    let cli = Cli::parse_from(["tally", "history", "--username", "Charlie"]);
    let Command::History { account } = cli.command else { panic!("wrong command") };
    assert_eq!(account.pk().unwrap(), Pk::from_username("charlie"));

    let cli = Cli::parse_from(["tally", "history", "--pk", "12345"]);
    let Command::History { account } = cli.command else { panic!("wrong command") };
    assert_eq!(account.pk().unwrap(), Pk::Stable("12345".into()));

    assert!(Cli::try_parse_from(["tally", "history"]).is_err());
    assert!(
      Cli::try_parse_from(["tally", "history", "--pk", "1", "--username", "a"]).is_err()
    );
  }

  #[test]
  fn resolve_parses_status() {
    let cli = Cli::parse_from([
      "tally", "resolve", "--username", "charlie", "--status", "renamed",
      "--new-username", "charlie2",
    ]);
    let Command::Resolve { status, new_username, .. } = cli.command else {
      panic!("wrong command")
    };
    assert_eq!(status, VerificationStatus::Renamed);
    assert_eq!(new_username.as_deref(), Some("charlie2"));
    assert!(Cli::try_parse_from(["tally", "resolve", "--pk", "1", "--status", "gone"]).is_err());
  }

  #[test]
  fn diff_ids_come_in_pairs() {
    assert!(Cli::try_parse_from(["tally", "diff", "--old", "1"]).is_err());
    assert!(Cli::try_parse_from(["tally", "diff", "--old", "1", "--new", "2"]).is_ok());
  }

  #[test]
  fn entry_rendering_includes_resolution() {
    let entry = VerificationEntry {
      id:                        3,
      account:                   resolve(&RawAccount::new("charlie")),
      snapshot_last_seen_id:     1,
      snapshot_first_missing_id: 2,
      status:                    VerificationStatus::Renamed,
      notes:                     Some("checked profile".into()),
      new_username:              Some("charlie2".into()),
      created_at:                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
      resolved_at:               None,
    };
    assert_eq!(
      render_entry(&entry),
      "#3 charlie (username:charlie) renamed [last seen in 1, missing from 2] now \
       charlie2: checked profile"
    );
    assert_eq!(names(&[]), "-");
  }
}
