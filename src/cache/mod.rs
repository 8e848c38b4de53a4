//! Key/value read cache with per-read TTL.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Stores serialized values with the time they were written
//! - Treats entries older than the caller's ttl as absent (and removes them)
//! - Supports invalidation by key, by prefix, or wholesale

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage};
pub use traits::{CachedValue, Invalidation, QueryKey};
