//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

/// A read query that can be cached.
///
/// The key must be deterministic and include every parameter that changes the
/// result, so distinct queries never share an entry.
pub trait QueryKey {
  /// Stable cache key (e.g. `students_list_all_all_all__all_1_20`)
  fn cache_key(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;
}

/// A raw cached payload.
#[derive(Debug, Clone)]
pub struct CachedValue {
  /// Serialized JSON
  pub value: Vec<u8>,
  /// When the payload was written
  pub written_at: DateTime<Utc>,
}

/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
  /// Exactly one key
  Key(String),
  /// Every key starting with the prefix (e.g. `students_`)
  Prefix(String),
  /// Everything
  All,
}
