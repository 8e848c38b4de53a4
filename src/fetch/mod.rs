//! Read path: cache, then remote, then local store.
//!
//! ```ignore
//! let result = fetcher
//!   .fetch_data(
//!     FetchRequest::new(&key, Duration::minutes(30)),
//!     || async move { remote::call(&*client, request).await },
//!     || async move { store.load_entities::<Student>().map(Some) },
//!   )
//!   .await;
//! ```

mod result;

use chrono::Duration;
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::cache::{CacheLayer, QueryKey};
use crate::connectivity::ConnectivityMonitor;

pub use result::{DataSource, FetchResult};

/// Message attached to results served from the local store.
pub const USED_LOCAL_DATA: &str = "used local data";

/// Parameters of one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub cache_key: String,
  pub ttl: Duration,
  pub force_refresh: bool,
}

impl FetchRequest {
  pub fn new(key: &impl QueryKey, ttl: Duration) -> Self {
    Self {
      cache_key: key.cache_key(),
      ttl,
      force_refresh: false,
    }
  }

  pub fn force_refresh(mut self, force: bool) -> Self {
    self.force_refresh = force;
    self
  }
}

/// Serves reads from the freshest source available.
#[derive(Clone, Debug)]
pub struct FetchCoordinator {
  cache: CacheLayer,
  connectivity: Arc<ConnectivityMonitor>,
}

impl FetchCoordinator {
  pub fn new(cache: CacheLayer, connectivity: Arc<ConnectivityMonitor>) -> Self {
    Self {
      cache,
      connectivity,
    }
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  /// Resolve a read without ever failing on network problems.
  ///
  /// 1. Online and not forced: a cache entry younger than `ttl` is returned as is
  /// 2. Online: `remote` is called; its result is written to the cache
  /// 3. Otherwise (offline, or remote failed): `local` is consulted
  ///
  /// Only when `local` has nothing either is a [`FetchResult::Failure`] returned.
  pub async fn fetch_data<T, R, RFut, L, LFut>(
    &self,
    request: FetchRequest,
    remote: R,
    local: L,
  ) -> FetchResult<T>
  where
    T: Serialize + DeserializeOwned,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<T>>,
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<Option<T>>>,
  {
    let key = request.cache_key.as_str();
    let online = self.connectivity.is_connected();
    let mut remote_error = None;

    if online {
      if !request.force_refresh {
        match self.cache.get::<T>(key, request.ttl) {
          Ok(Some(data)) => {
            tracing::debug!(event = "cache_hit", key, "served from cache");
            return FetchResult::success(data, DataSource::Cache);
          }
          Ok(None) => tracing::debug!(event = "cache_miss", key, "cache miss"),
          Err(e) => {
            tracing::warn!(event = "cache_miss", key, error = %e, "cache read failed; treating as miss")
          }
        }
      }

      match remote().await {
        Ok(data) => {
          if let Err(e) = self.cache.put(key, &data) {
            tracing::warn!(key, error = %e, "failed to write remote result to cache");
          }
          tracing::debug!(event = "remote_success", key, "served from remote");
          return FetchResult::success(data, DataSource::Remote);
        }
        Err(e) => {
          tracing::warn!(event = "remote_failure", key, error = %e, "remote read failed; falling back to local data");
          remote_error = Some(e.to_string());
        }
      }
    }

    match local().await {
      Ok(Some(data)) => {
        tracing::info!(event = "local_fallback", key, online, "served from local store");
        FetchResult::Success {
          data,
          source: DataSource::Local,
          message: Some(USED_LOCAL_DATA.to_string()),
        }
      }
      Ok(None) => {
        let message = match remote_error {
          Some(remote) => format!("No data available: {}", remote),
          None => "No data available offline".to_string(),
        };
        tracing::warn!(event = "fetch_failure", key, %message, "no data from any source");
        FetchResult::failure(message)
      }
      Err(e) => {
        let message = format!("Failed to read local data: {}", e);
        tracing::error!(event = "fetch_failure", key, %message, "local read failed");
        FetchResult::failure(message)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::Harness;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Key(&'static str);

  impl QueryKey for Key {
    fn cache_key(&self) -> String {
      self.0.to_string()
    }

    fn description(&self) -> String {
      self.0.to_string()
    }
  }

  fn request(key: &'static str) -> FetchRequest {
    FetchRequest::new(&Key(key), Duration::minutes(30))
  }

  async fn setup(online: bool) -> (Harness, FetchCoordinator) {
    let harness = Harness::new(online).await;
    let fetcher = FetchCoordinator::new(harness.cache.clone(), harness.monitor.clone());
    (harness, fetcher)
  }

  #[tokio::test]
  async fn test_cache_hit_skips_remote() {
    let (harness, fetcher) = setup(true).await;
    harness.cache.put("k", &7u32).unwrap();
    let calls = AtomicUsize::new(0);

    let result = fetcher
      .fetch_data(
        request("k"),
        || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(1u32)
        },
        || async { Ok(None) },
      )
      .await;

    assert_eq!(result.data(), Some(&7));
    assert_eq!(result.source(), Some(DataSource::Cache));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_expired_cache_forces_remote() {
    let (harness, fetcher) = setup(true).await;
    harness.cache.put("k", &7u32).unwrap();
    harness.clock.advance(Duration::minutes(31));

    let result = fetcher
      .fetch_data(request("k"), || async { Ok(8u32) }, || async { Ok(None) })
      .await;

    assert_eq!(result.data(), Some(&8));
    assert_eq!(result.source(), Some(DataSource::Remote));
  }

  #[tokio::test]
  async fn test_remote_success_writes_through() {
    let (harness, fetcher) = setup(true).await;

    let result = fetcher
      .fetch_data(request("k"), || async { Ok(vec!["a".to_string()]) }, || async { Ok(None) })
      .await;
    assert_eq!(result.source(), Some(DataSource::Remote));

    let cached: Option<Vec<String>> = harness.cache.get("k", Duration::minutes(1)).unwrap();
    assert_eq!(cached, Some(vec!["a".to_string()]));
  }

  #[tokio::test]
  async fn test_force_refresh_bypasses_cache() {
    let (harness, fetcher) = setup(true).await;
    harness.cache.put("k", &1u32).unwrap();

    let result = fetcher
      .fetch_data(
        request("k").force_refresh(true),
        || async { Ok(2u32) },
        || async { Ok(None) },
      )
      .await;
    assert_eq!(result.data(), Some(&2));
    assert_eq!(harness.cache.get::<u32>("k", Duration::minutes(1)).unwrap(), Some(2));
  }

  #[tokio::test]
  async fn test_remote_failure_uses_local() {
    let (_harness, fetcher) = setup(true).await;

    let result = fetcher
      .fetch_data(
        request("k"),
        || async { Err::<u32, _>(eyre!("HTTP 500")) },
        || async { Ok(Some(42u32)) },
      )
      .await;

    match result {
      FetchResult::Success {
        data,
        source,
        message,
      } => {
        assert_eq!(data, 42);
        assert_eq!(source, DataSource::Local);
        assert_eq!(message.as_deref(), Some(USED_LOCAL_DATA));
      }
      FetchResult::Failure { message } => panic!("unexpected failure: {}", message),
    }
  }

  #[tokio::test]
  async fn test_no_data_anywhere_is_failure() {
    let (_harness, fetcher) = setup(true).await;

    let result = fetcher
      .fetch_data(
        request("k"),
        || async { Err::<u32, _>(eyre!("timeout")) },
        || async { Ok(None) },
      )
      .await;

    assert!(!result.is_success());
    let message = result.message().unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("timeout"));
  }

  #[tokio::test]
  async fn test_offline_skips_cache_and_remote() {
    let (harness, fetcher) = setup(false).await;
    harness.cache.put("k", &1u32).unwrap();
    let calls = AtomicUsize::new(0);

    let result = fetcher
      .fetch_data(
        request("k"),
        || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(2u32)
        },
        || async { Ok(Some(3u32)) },
      )
      .await;

    assert_eq!(result.data(), Some(&3));
    assert_eq!(result.source(), Some(DataSource::Local));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_local_error_is_failure_not_panic() {
    let (_harness, fetcher) = setup(false).await;

    let result = fetcher
      .fetch_data(
        request("k"),
        || async { Ok(1u32) },
        || async { Err::<Option<u32>, _>(eyre!("disk full")) },
      )
      .await;

    assert!(!result.is_success());
    assert!(result.message().unwrap().contains("disk full"));
  }
}
