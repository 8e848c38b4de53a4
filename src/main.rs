use chrono::Duration;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use edusync::cache::Invalidation;
use edusync::config::Config;
use edusync::connectivity::{DnsProbe, ReachabilityProbe};
use edusync::context::Context;
use edusync::db::QueueStatus;

#[derive(Parser, Debug)]
#[command(name = "edusync")]
#[command(about = "Inspect and drive the offline sync queue of the school app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/edusync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Connectivity and queue overview
  Status,
  /// Check whether the server side is reachable
  Probe,
  /// List queued writes in the order they will be sent
  Pending,
  /// Send queued writes now
  Sync,
  /// Manage cached reads
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Give abandoned writes another chance
  RetryAbandoned,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop cached reads, all or by key prefix
  Clear {
    #[arg(long)]
    prefix: Option<String>,
  },
  /// Drop cached reads older than the given age
  Purge {
    #[arg(long)]
    older_than_hours: u32,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = edusync::logging::init(&config)?;

  let ctx = Context::new(config)?;
  tracing::debug!(command = ?args.command, "running command");

  match args.command {
    Command::Status => {
      let online = ctx.monitor.recheck().await;
      println!("connectivity: {}", if online { "online" } else { "offline" });
      println!("queued writes: {}", ctx.sync.pending_count()?);
      println!(
        "abandoned: {}",
        ctx.store.queue_len(Some(QueueStatus::Abandoned))?
      );
      for entity_type in ["students", "grades", "subjects"] {
        println!(
          "unsynced {}: {}",
          entity_type,
          ctx.store.unsynced_count(entity_type)?
        );
      }
      println!("cached reads: {}", ctx.fetcher.cache().len()?);
      println!("retry policy: {:?}", ctx.sync.policy());
    }
    Command::Probe => {
      let probe = DnsProbe::new(
        ctx.config.connectivity.probe_hosts.clone(),
        ctx.config.connectivity.probe_timeout(),
      );
      println!("probing {}", probe.hosts().join(", "));
      let online = probe.is_reachable().await;
      println!("{}", if online { "reachable" } else { "unreachable" });
    }
    Command::Pending => {
      let rows = ctx.sync.pending()?;
      if rows.is_empty() {
        println!("nothing queued");
      }
      for row in rows {
        print!(
          "#{} {} [{}] retries={} queued={}",
          row.id,
          row.key,
          row.status.as_str(),
          row.retry_count,
          row.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        match row.error_message {
          Some(error) => println!(" last error: {}", error),
          None => println!(),
        }
      }
    }
    Command::Sync => {
      if !ctx.monitor.recheck().await {
        println!("offline; nothing sent");
        return Ok(());
      }
      let report = ctx.sync.perform_batch_sync().await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Cache { action } => match action {
      CacheAction::Clear { prefix } => {
        let what = match prefix {
          Some(prefix) => Invalidation::Prefix(prefix),
          None => Invalidation::All,
        };
        println!("removed {} entries", ctx.fetcher.cache().invalidate(what)?);
      }
      CacheAction::Purge { older_than_hours } => {
        let removed = ctx
          .fetcher
          .cache()
          .purge_older_than(purge_age(older_than_hours)?)?;
        println!("removed {} entries", removed);
      }
    },
    Command::RetryAbandoned => {
      println!("revived {} writes", ctx.sync.retry_abandoned()?);
    }
  }

  Ok(())
}

fn purge_age(hours: u32) -> Result<Duration> {
  Duration::try_hours(i64::from(hours)).ok_or_else(|| eyre!("--older-than-hours is too large: {}", hours))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_purge_age_rejects_negative_hours() {
    assert!(Args::try_parse_from(["edusync", "cache", "purge", "--older-than-hours", "-5"]).is_err());
    assert!(Args::try_parse_from(["edusync", "cache", "purge", "--older-than-hours", "48"]).is_ok());
  }

  #[test]
  fn test_purge_age_for_largest_input() {
    assert_eq!(purge_age(u32::MAX).unwrap(), Duration::hours(i64::from(u32::MAX)));
  }
}
