//! TTL read-through cache over a [`CacheStorage`] backend.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::Invalidation;
use crate::clock::Clock;

/// Cache layer that stores serialized values with their write time.
///
/// Entries carry no ttl of their own: each read decides how old is too old.
/// There is no size-based eviction; entries go away on invalidation, on the
/// read that finds them expired, or via [`CacheLayer::purge_older_than`].
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  /// An entry written at `written_at` is valid while `now - written_at <= ttl`.
  fn is_expired(&self, written_at: DateTime<Utc>, ttl: Duration) -> bool {
    self.clock.now() - written_at > ttl
  }

  /// Get the value under `key` if it is younger than `ttl`.
  ///
  /// Expired entries and entries that no longer deserialize as `T` count as
  /// misses and are removed.
  pub fn get<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Result<Option<T>> {
    let Some(cached) = self.storage.read(key)? else {
      return Ok(None);
    };

    if self.is_expired(cached.written_at, ttl) {
      tracing::debug!(key, written_at = %cached.written_at, "cache entry expired");
      self.storage.remove(key)?;
      return Ok(None);
    }

    match serde_json::from_slice(&cached.value) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        tracing::warn!(key, error = %e, "dropping undecodable cache entry");
        self.storage.remove(key)?;
        Ok(None)
      }
    }
  }

  /// Store `value` under `key`, overwriting value and timestamp together.
  pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let bytes =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize cache value: {}", e))?;
    self.storage.write(key, &bytes, self.clock.now())
  }

  /// Drop entries. Returns how many were removed.
  pub fn invalidate(&self, what: Invalidation) -> Result<usize> {
    let removed = match &what {
      Invalidation::Key(key) => usize::from(self.storage.remove(key)?),
      Invalidation::Prefix(prefix) => self.storage.remove_prefix(prefix)?,
      Invalidation::All => self.storage.clear()?,
    };
    tracing::debug!(?what, removed, "cache invalidated");
    Ok(removed)
  }

  /// Remove everything older than `max_age`, whatever ttl readers use.
  pub fn purge_older_than(&self, max_age: Duration) -> Result<usize> {
    if max_age < Duration::zero() {
      return Err(eyre!("Purge age must not be negative"));
    }
    match self.clock.now().checked_sub_signed(max_age) {
      Some(cutoff) => self.storage.remove_written_before(cutoff),
      // Nothing can be older than the earliest representable time
      None => Ok(0),
    }
  }

  pub fn len(&self) -> Result<usize> {
    self.storage.len()
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}

impl std::fmt::Debug for CacheLayer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheLayer").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::db::Store;

  fn layer() -> (Arc<ManualClock>, CacheLayer) {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(Store::open_in_memory(clock.clone()).unwrap());
    (clock.clone(), CacheLayer::new(store, clock))
  }

  #[test]
  fn test_hit_within_ttl() {
    let (clock, cache) = layer();
    cache.put("k", &vec![1, 2, 3]).unwrap();
    clock.advance(Duration::minutes(30));

    let value: Option<Vec<i32>> = cache.get("k", Duration::minutes(30)).unwrap();
    assert_eq!(value, Some(vec![1, 2, 3]));
  }

  #[test]
  fn test_miss_after_ttl_and_entry_removed() {
    let (clock, cache) = layer();
    cache.put("k", "v").unwrap();
    clock.advance(Duration::minutes(30) + Duration::seconds(1));

    let value: Option<String> = cache.get("k", Duration::minutes(30)).unwrap();
    assert_eq!(value, None);
    assert!(cache.is_empty().unwrap());
  }

  #[test]
  fn test_ttl_is_chosen_by_reader() {
    let (clock, cache) = layer();
    cache.put("k", "v").unwrap();
    clock.advance(Duration::minutes(45));

    assert_eq!(
      cache.get::<String>("k", Duration::hours(1)).unwrap(),
      Some("v".to_string())
    );
  }

  #[test]
  fn test_put_twice_keeps_one_entry() {
    let (clock, cache) = layer();
    cache.put("k", "first").unwrap();
    clock.advance(Duration::minutes(20));
    cache.put("k", "second").unwrap();
    clock.advance(Duration::minutes(20));

    assert_eq!(cache.len().unwrap(), 1);
    // The overwrite refreshed the timestamp too
    assert_eq!(
      cache.get::<String>("k", Duration::minutes(30)).unwrap(),
      Some("second".to_string())
    );
  }

  #[test]
  fn test_wrong_type_is_a_miss() {
    let (_clock, cache) = layer();
    cache.put("k", "not a number").unwrap();
    assert_eq!(cache.get::<u32>("k", Duration::hours(1)).unwrap(), None);
    assert!(cache.is_empty().unwrap());
  }

  #[test]
  fn test_invalidate_key_prefix_all() {
    let (_clock, cache) = layer();
    for key in ["students_list_a", "students_detail_1", "grades_list_a", "auth_token"] {
      cache.put(key, "v").unwrap();
    }

    assert_eq!(cache.invalidate(Invalidation::Key("auth_token".into())).unwrap(), 1);
    assert_eq!(cache.invalidate(Invalidation::Key("auth_token".into())).unwrap(), 0);
    assert_eq!(cache.invalidate(Invalidation::Prefix("students_".into())).unwrap(), 2);
    assert_eq!(cache.len().unwrap(), 1);
    assert_eq!(cache.invalidate(Invalidation::All).unwrap(), 1);
    assert!(cache.is_empty().unwrap());
  }

  #[test]
  fn test_purge_older_than() {
    let (clock, cache) = layer();
    cache.put("old", "v").unwrap();
    clock.advance(Duration::days(3));
    cache.put("new", "v").unwrap();

    assert_eq!(cache.purge_older_than(Duration::days(1)).unwrap(), 1);
    assert_eq!(cache.len().unwrap(), 1);
  }

  #[test]
  fn test_purge_bounds() {
    let (_clock, cache) = layer();
    cache.put("k", "v").unwrap();

    assert!(cache.purge_older_than(Duration::hours(-1)).is_err());
    assert_eq!(cache.purge_older_than(Duration::MAX).unwrap(), 0);
    assert_eq!(cache.len().unwrap(), 1);
  }
}
