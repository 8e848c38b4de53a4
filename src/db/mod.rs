//! Durable local storage.
//!
//! A single SQLite database holds three kinds of rows:
//! - domain entities (`entities`), used as the local fallback for reads
//! - the key/value cache (`cache_entries`), see [`crate::cache`]
//! - the pending-mutation queue (`sync_queue`), see [`crate::sync`]

pub mod entities;
pub mod queue;
pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;

pub use queue::{NewQueueRow, QueueRow, QueueStatus, SyncKey};

/// Database connection wrapper shared by the cache, the queue and the repositories.
///
/// Open it once per process and hand out `Arc<Store>`.
pub struct Store {
  conn: Mutex<Connection>,
  clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store").finish_non_exhaustive()
  }
}

impl Store {
  /// Open or create the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>, clock: Arc<dyn Clock>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    tracing::debug!(path = %path.display(), "opened local store");
    Self::from_connection(conn, clock)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn, clock)
  }

  fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
      clock,
    };
    store.run_migrations()?;

    let interrupted = store.reset_interrupted()?;
    if interrupted > 0 {
      tracing::warn!(count = interrupted, "requeued mutations interrupted mid-sync");
    }

    Ok(store)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("edusync").join("edusync.db"))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Current time according to the store's clock.
  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }
}

/// Timestamps are stored as fixed-width RFC 3339 so that text order is time order.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}
