//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::traits::CachedValue;
use crate::db::{format_timestamp, parse_timestamp, Store};

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get the raw entry stored under `key`.
  fn read(&self, key: &str) -> Result<Option<CachedValue>>;

  /// Overwrite the entry under `key` (value and timestamp together).
  fn write(&self, key: &str, value: &[u8], written_at: DateTime<Utc>) -> Result<()>;

  /// Remove one key. Returns whether it existed.
  fn remove(&self, key: &str) -> Result<bool>;

  /// Remove every key starting with `prefix`.
  fn remove_prefix(&self, prefix: &str) -> Result<usize>;

  /// Remove everything.
  fn clear(&self) -> Result<usize>;

  /// Remove entries written before `cutoff`.
  fn remove_written_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

  /// Number of stored entries.
  fn len(&self) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
#[derive(Debug, Default)]
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn read(&self, _key: &str) -> Result<Option<CachedValue>> {
    Ok(None) // Always miss
  }

  fn write(&self, _key: &str, _value: &[u8], _written_at: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn remove_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self) -> Result<usize> {
    Ok(0)
  }

  fn remove_written_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }

  fn len(&self) -> Result<usize> {
    Ok(0)
  }
}

impl CacheStorage for Store {
  fn read(&self, key: &str) -> Result<Option<CachedValue>> {
    let conn = self.conn()?;
    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT value, written_at FROM cache_entries WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry '{}': {}", key, e))?;

    match row {
      Some((value, written_at)) => Ok(Some(CachedValue {
        value,
        written_at: parse_timestamp(&written_at)?,
      })),
      None => Ok(None),
    }
  }

  fn write(&self, key: &str, value: &[u8], written_at: DateTime<Utc>) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, value, written_at) VALUES (?, ?, ?)",
        params![key, value, format_timestamp(written_at)],
      )
      .map_err(|e| eyre!("Failed to write cache entry '{}': {}", key, e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM cache_entries WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache entry '{}': {}", key, e))?;
    Ok(removed > 0)
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    // substr instead of LIKE: keys are full of `_`, which LIKE treats as a wildcard
    self
      .conn()?
      .execute(
        "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
        params![prefix],
      )
      .map_err(|e| eyre!("Failed to remove cache prefix '{}': {}", prefix, e))
  }

  fn clear(&self) -> Result<usize> {
    self
      .conn()?
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }

  fn remove_written_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    self
      .conn()?
      .execute(
        "DELETE FROM cache_entries WHERE written_at < ?",
        params![format_timestamp(cutoff)],
      )
      .map_err(|e| eyre!("Failed to purge cache: {}", e))
  }

  fn len(&self) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}
