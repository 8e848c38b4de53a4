//! Rows of the pending-mutation queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::fmt;
use std::str::FromStr;

use super::{format_timestamp, parse_timestamp, Store};

/// Identity of one logical write: at most one queued row exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey {
  pub table: String,
  pub record_id: String,
  pub operation: String,
}

impl SyncKey {
  pub fn new(
    table: impl Into<String>,
    record_id: impl Into<String>,
    operation: impl Into<String>,
  ) -> Self {
    Self {
      table: table.into(),
      record_id: record_id.into(),
      operation: operation.into(),
    }
  }
}

impl fmt::Display for SyncKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.table, self.record_id, self.operation)
  }
}

impl FromStr for SyncKey {
  type Err = color_eyre::Report;

  /// Parses `table:record_id:operation`. The record id may itself contain colons.
  fn from_str(s: &str) -> Result<Self> {
    let (table, rest) = s
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid sync key '{}'", s))?;
    let (record_id, operation) = rest
      .rsplit_once(':')
      .ok_or_else(|| eyre!("Invalid sync key '{}'", s))?;
    if table.is_empty() || record_id.is_empty() || operation.is_empty() {
      return Err(eyre!("Invalid sync key '{}'", s));
    }
    Ok(Self::new(table, record_id, operation))
  }
}

/// Lifecycle of a queued row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  /// Waiting for its first replay
  Pending,
  /// Replay in flight
  Syncing,
  /// Last replay failed; will be retried
  Failed,
  /// Retry budget exhausted; skipped until revived
  Abandoned,
}

impl QueueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Syncing => "syncing",
      Self::Failed => "failed",
      Self::Abandoned => "abandoned",
    }
  }
}

impl FromStr for QueueStatus {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "syncing" => Ok(Self::Syncing),
      "failed" => Ok(Self::Failed),
      "abandoned" => Ok(Self::Abandoned),
      other => Err(eyre!("Unknown queue status '{}'", other)),
    }
  }
}

/// A mutation about to be written to the queue.
#[derive(Debug, Clone)]
pub struct NewQueueRow<'a> {
  pub key: &'a SyncKey,
  pub payload: &'a str,
}

/// A stored queue row.
#[derive(Debug, Clone)]
pub struct QueueRow {
  pub id: i64,
  pub key: SyncKey,
  pub payload: String,
  pub status: QueueStatus,
  pub retry_count: u32,
  pub error_message: Option<String>,
  pub next_attempt_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

const QUEUE_COLUMNS: &str = "id, table_name, record_id, operation, payload, status, retry_count,
   error_message, next_attempt_at, created_at, updated_at";

/// Raw column values, converted outside the rusqlite closure so parse errors surface as eyre reports.
type RawQueueRow = (
  i64,
  String,
  String,
  String,
  String,
  String,
  u32,
  Option<String>,
  Option<String>,
  String,
  String,
);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawQueueRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
    row.get(7)?,
    row.get(8)?,
    row.get(9)?,
    row.get(10)?,
  ))
}

fn into_queue_row(raw: RawQueueRow) -> Result<QueueRow> {
  let (
    id,
    table,
    record_id,
    operation,
    payload,
    status,
    retry_count,
    error_message,
    next_attempt_at,
    created_at,
    updated_at,
  ) = raw;

  Ok(QueueRow {
    id,
    key: SyncKey::new(table, record_id, operation),
    payload,
    status: status.parse()?,
    retry_count,
    error_message,
    next_attempt_at: next_attempt_at.as_deref().map(parse_timestamp).transpose()?,
    created_at: parse_timestamp(&created_at)?,
    updated_at: parse_timestamp(&updated_at)?,
  })
}

impl Store {
  /// Insert a mutation, replacing any row that already exists for the same key.
  ///
  /// A replaced row starts over: new payload, new position at the back of the
  /// queue, retry counters reset.
  pub fn enqueue(&self, row: NewQueueRow<'_>) -> Result<()> {
    let now = format_timestamp(self.now());
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO sync_queue
           (table_name, record_id, operation, payload, status, retry_count, error_message,
            next_attempt_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, 'pending', 0, NULL, NULL, ?, ?)",
        params![
          row.key.table,
          row.key.record_id,
          row.key.operation,
          row.payload,
          now,
          now
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation {}: {}", row.key, e))?;
    Ok(())
  }

  /// All queued rows, oldest first.
  pub fn queued(&self) -> Result<Vec<QueueRow>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM sync_queue ORDER BY created_at ASC, id ASC",
        QUEUE_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let raw: Vec<RawQueueRow> = stmt
      .query_map([], read_raw)
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    raw.into_iter().map(into_queue_row).collect()
  }

  /// Look up the row stored for `key`.
  pub fn queued_row(&self, key: &SyncKey) -> Result<Option<QueueRow>> {
    let conn = self.conn()?;
    let raw = conn
      .query_row(
        &format!(
          "SELECT {} FROM sync_queue WHERE table_name = ? AND record_id = ? AND operation = ?",
          QUEUE_COLUMNS
        ),
        params![key.table, key.record_id, key.operation],
        read_raw,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query queue row {}: {}", key, e))?;

    raw.map(into_queue_row).transpose()
  }

  /// Delete the row for `key`. Returns whether a row existed.
  pub fn dequeue(&self, key: &SyncKey) -> Result<bool> {
    let removed = self
      .conn()?
      .execute(
        "DELETE FROM sync_queue WHERE table_name = ? AND record_id = ? AND operation = ?",
        params![key.table, key.record_id, key.operation],
      )
      .map_err(|e| eyre!("Failed to remove queued mutation {}: {}", key, e))?;
    Ok(removed > 0)
  }

  /// Whether any row, whatever its operation or status, is queued for one record.
  pub fn has_queued_for(&self, table: &str, record_id: &str) -> Result<bool> {
    self
      .conn()?
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM sync_queue WHERE table_name = ? AND record_id = ?)",
        params![table, record_id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to query queue for {} {}: {}", table, record_id, e))
  }

  /// Delete a row by id, as read during a drain.
  pub fn dequeue_id(&self, id: i64) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued mutation #{}: {}", id, e))?;
    Ok(removed > 0)
  }

  pub fn set_queue_status(&self, id: i64, status: QueueStatus) -> Result<()> {
    let now = format_timestamp(self.now());
    self
      .conn()?
      .execute(
        "UPDATE sync_queue SET status = ?, updated_at = ? WHERE id = ?",
        params![status.as_str(), now, id],
      )
      .map_err(|e| eyre!("Failed to update queue status: {}", e))?;
    Ok(())
  }

  /// Record a failed replay and return the new retry count.
  ///
  /// `None` when the row is gone, i.e. it was replaced by a newer mutation
  /// for the same key while the replay was in flight.
  pub fn record_queue_failure(
    &self,
    id: i64,
    error: &str,
    status: QueueStatus,
    next_attempt_at: Option<DateTime<Utc>>,
  ) -> Result<Option<u32>> {
    let now = format_timestamp(self.now());
    self
      .conn()?
      .query_row(
        "UPDATE sync_queue
         SET retry_count = retry_count + 1, error_message = ?, status = ?,
             next_attempt_at = ?, updated_at = ?
         WHERE id = ?
         RETURNING retry_count",
        params![
          error,
          status.as_str(),
          next_attempt_at.map(format_timestamp),
          now,
          id
        ],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to record failure for queued mutation #{}: {}", id, e))
  }

  /// Put rows left in `syncing` (process died mid-replay) back to `pending`.
  pub fn reset_interrupted(&self) -> Result<usize> {
    self
      .conn()?
      .execute(
        "UPDATE sync_queue SET status = 'pending' WHERE status = 'syncing'",
        [],
      )
      .map_err(|e| eyre!("Failed to reset interrupted mutations: {}", e))
  }

  /// Give abandoned rows a fresh retry budget.
  pub fn revive_abandoned(&self) -> Result<usize> {
    let now = format_timestamp(self.now());
    self
      .conn()?
      .execute(
        "UPDATE sync_queue
         SET status = 'pending', retry_count = 0, next_attempt_at = NULL, updated_at = ?
         WHERE status = 'abandoned'",
        params![now],
      )
      .map_err(|e| eyre!("Failed to revive abandoned mutations: {}", e))
  }

  /// Number of queued rows, optionally restricted to one status.
  pub fn queue_len(&self, status: Option<QueueStatus>) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = match status {
      Some(status) => conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE status = ?",
        params![status.as_str()],
        |row| row.get(0),
      ),
      None => conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0)),
    }
    .map_err(|e| eyre!("Failed to count queued mutations: {}", e))?;
    Ok(count as usize)
  }
}
