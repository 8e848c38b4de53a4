//! Local copies of domain records.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::{format_timestamp, Store};
use crate::models::Entity;

impl Store {
  /// Insert or overwrite a record. `is_synced` is written both to the row and the payload.
  pub fn save_entity<T: Entity>(&self, entity: &T, is_synced: bool) -> Result<()> {
    let mut entity = entity.clone();
    entity.set_synced(is_synced);

    let data =
      serde_json::to_string(&entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO entities (entity_type, id, data, created_at, updated_at, is_synced)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          T::entity_type(),
          entity.id(),
          data,
          format_timestamp(entity.created_at()),
          format_timestamp(entity.updated_at()),
          is_synced
        ],
      )
      .map_err(|e| eyre!("Failed to store {} {}: {}", T::entity_type(), entity.id(), e))?;

    Ok(())
  }

  /// Save several records in one transaction.
  pub fn save_entities<T: Entity>(&self, entities: &[T], is_synced: bool) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for entity in entities {
      let mut entity = entity.clone();
      entity.set_synced(is_synced);
      let data =
        serde_json::to_string(&entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
      tx.execute(
        "INSERT OR REPLACE INTO entities (entity_type, id, data, created_at, updated_at, is_synced)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          T::entity_type(),
          entity.id(),
          data,
          format_timestamp(entity.created_at()),
          format_timestamp(entity.updated_at()),
          is_synced
        ],
      )
      .map_err(|e| eyre!("Failed to store {} {}: {}", T::entity_type(), entity.id(), e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  pub fn load_entity<T: Entity>(&self, id: &str) -> Result<Option<T>> {
    let conn = self.conn()?;
    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM entities WHERE entity_type = ? AND id = ?",
        params![T::entity_type(), id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load {} {}: {}", T::entity_type(), id, e))?;

    data
      .map(|data| {
        serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize {} {}: {}", T::entity_type(), id, e))
      })
      .transpose()
  }

  /// Every stored record of type `T`, newest first. Rows that no longer deserialize are skipped.
  pub fn load_entities<T: Entity>(&self) -> Result<Vec<T>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, data FROM entities WHERE entity_type = ?
         ORDER BY created_at DESC, id ASC",
      )
      .map_err(|e| eyre!("Failed to prepare entity query: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params![T::entity_type()], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query entities: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entity row: {}", e))?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(id, data)| match serde_json::from_str(&data) {
          Ok(entity) => Some(entity),
          Err(e) => {
            tracing::warn!(entity_type = T::entity_type(), id = %id, error = %e, "skipping unreadable local record");
            None
          }
        })
        .collect(),
    )
  }

  pub fn delete_entity<T: Entity>(&self, id: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute(
        "DELETE FROM entities WHERE entity_type = ? AND id = ?",
        params![T::entity_type(), id],
      )
      .map_err(|e| eyre!("Failed to delete {} {}: {}", T::entity_type(), id, e))?;
    Ok(removed > 0)
  }

  /// Flag a stored record as confirmed by the server. Returns whether it exists.
  pub fn mark_entity_synced(&self, entity_type: &str, id: &str) -> Result<bool> {
    let updated = self
      .conn()?
      .execute(
        "UPDATE entities SET is_synced = 1, data = json_set(data, '$.isSynced', json('true'))
         WHERE entity_type = ? AND id = ?",
        params![entity_type, id],
      )
      .map_err(|e| eyre!("Failed to mark {} {} synced: {}", entity_type, id, e))?;
    Ok(updated > 0)
  }

  /// Number of records of `entity_type` still waiting for server confirmation.
  pub fn unsynced_count(&self, entity_type: &str) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM entities WHERE entity_type = ? AND is_synced = 0",
        params![entity_type],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count unsynced records: {}", e))?;
    Ok(count as usize)
  }
}
