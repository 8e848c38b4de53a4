//! Typed façades over the read and write paths.
//!
//! Repositories own cache-key construction and invalidation. They never touch
//! the store directly for writes; local copies go through the
//! [`SyncCoordinator`], reads through the [`FetchCoordinator`].

mod auth;
mod grade;
mod student;
mod subject;

use chrono::Duration;
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::cache::{Invalidation, QueryKey};
use crate::db::Store;
use crate::fetch::{FetchCoordinator, FetchRequest, FetchResult};
use crate::models::Entity;
use crate::remote::{self, RemoteClient, RemoteRequest};
use crate::sync::{Mutation, SyncCoordinator, SyncResult};

pub use auth::{AuthKey, AuthRepository};
pub use grade::{GradeKey, GradeRepository, GradeStatisticsScope};
pub use student::{StudentKey, StudentRepository};
pub use subject::{SubjectKey, SubjectRepository};

/// Lists and statistics
pub fn list_ttl() -> Duration {
  Duration::minutes(30)
}

/// Session and current-user data
pub fn session_ttl() -> Duration {
  Duration::hours(1)
}

/// Bearer tokens
pub fn token_ttl() -> Duration {
  Duration::hours(24)
}

/// Renders an optional filter value for a cache key.
pub(crate) fn or_all(value: Option<&str>) -> &str {
  value.unwrap_or("all")
}

/// Everything a repository needs, shared by all of them.
#[derive(Clone)]
pub struct Services {
  pub client: Arc<dyn RemoteClient>,
  pub store: Arc<Store>,
  pub fetcher: FetchCoordinator,
  pub sync: Arc<SyncCoordinator>,
}

impl Services {
  /// Read through cache, server and local store.
  ///
  /// `local` runs against the store and returns `None` when it has nothing
  /// meaningful to offer. `on_remote` sees every fresh server payload before
  /// it is returned, e.g. to keep local copies up to date.
  pub(crate) async fn read<T, L, O>(
    &self,
    key: &impl QueryKey,
    ttl: Duration,
    force_refresh: bool,
    request: RemoteRequest,
    local: L,
    on_remote: O,
  ) -> FetchResult<T>
  where
    T: Serialize + DeserializeOwned,
    L: FnOnce(&Store) -> Result<Option<T>>,
    O: FnOnce(&T) -> Result<()>,
  {
    tracing::trace!(query = %key.description(), "read");
    let client = self.client.clone();
    let store = self.store.clone();

    self
      .fetcher
      .fetch_data(
        FetchRequest::new(key, ttl).force_refresh(force_refresh),
        move || async move {
          let data = remote::call::<T>(client.as_ref(), request).await?;
          if let Err(e) = on_remote(&data) {
            tracing::warn!(error = %e, "failed to keep local copy of server data");
          }
          Ok(data)
        },
        move || async move { local(&store) },
      )
      .await
  }

  /// Create or update one record.
  ///
  /// The server's copy is stored as synced on success; otherwise `pending`
  /// is stored unsynced so local reads see the change right away.
  pub(crate) async fn save<T: Entity>(
    &self,
    mutation: Mutation,
    pending: T,
    prefix: &str,
  ) -> SyncResult<T> {
    let request = match mutation.to_request() {
      Ok(request) => request,
      Err(e) => {
        return SyncResult::Failed {
          message: e.to_string(),
        }
      }
    };
    let client = self.client.clone();

    let result = self
      .sync
      .sync_to_server(&mutation, move || async move {
        remote::call::<T>(client.as_ref(), request).await
      })
      .await;

    // An older write for the same record may still be queued
    let stored = match &result {
      SyncResult::Synced(server) => self
        .sync
        .is_settled(T::entity_type(), server.id())
        .and_then(|settled| self.sync.save_local(server, settled)),
      _ => self.sync.save_local(&pending, false),
    };
    if let Err(e) = stored {
      tracing::error!(entity_type = T::entity_type(), id = pending.id(), error = %e, "failed to store local copy");
    }

    self.invalidate(prefix);
    result
  }

  /// Create several records in one server call.
  pub(crate) async fn save_batch<T: Entity>(
    &self,
    mutations: Vec<Mutation>,
    pending: Vec<T>,
    request: RemoteRequest,
    prefix: &str,
  ) -> SyncResult<Vec<T>> {
    let client = self.client.clone();

    let result = self
      .sync
      .sync_all_to_server(&mutations, move || async move {
        remote::call::<Vec<T>>(client.as_ref(), request).await
      })
      .await;

    let stored = match &result {
      SyncResult::Synced(server) => self.sync.save_local_batch(server, true),
      _ => self.sync.save_local_batch(&pending, false),
    };
    if let Err(e) = stored {
      tracing::error!(entity_type = T::entity_type(), count = pending.len(), error = %e, "failed to store local copies");
    }

    self.invalidate(prefix);
    result
  }

  /// Delete one record. The local copy goes away immediately.
  pub(crate) async fn remove<T: Entity>(&self, mutation: Mutation, prefix: &str) -> SyncResult<()> {
    let request = match mutation.to_request() {
      Ok(request) => request,
      Err(e) => {
        return SyncResult::Failed {
          message: e.to_string(),
        }
      }
    };
    let client = self.client.clone();

    let result = self
      .sync
      .sync_to_server(&mutation, move || async move {
        remote::call_unit(client.as_ref(), request).await
      })
      .await;

    if let Err(e) = self.sync.remove_local::<T>(mutation.record_id()) {
      tracing::error!(entity_type = T::entity_type(), id = mutation.record_id(), error = %e, "failed to remove local copy");
    }

    self.invalidate(prefix);
    result
  }

  pub(crate) fn invalidate(&self, prefix: &str) {
    match self
      .fetcher
      .cache()
      .invalidate(Invalidation::Prefix(prefix.to_string()))
    {
      Ok(removed) => tracing::debug!(prefix, removed, "invalidated cache entries"),
      Err(e) => tracing::warn!(prefix, error = %e, "failed to invalidate cache entries"),
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::sync::{RemoteReplayer, RetryPolicy};
  use crate::testing::{FakeRemote, Harness};

  /// Harness plus repository services backed by a scripted remote.
  pub(crate) async fn services(online: bool) -> (Harness, Arc<FakeRemote>, Services) {
    let harness = Harness::new(online).await;
    let remote = Arc::new(FakeRemote::unreachable());
    let sync = Arc::new(SyncCoordinator::new(
      harness.store.clone(),
      harness.monitor.clone(),
      Arc::new(RemoteReplayer::new(remote.clone())),
      RetryPolicy::default(),
    ));
    let services = Services {
      client: remote.clone(),
      store: harness.store.clone(),
      fetcher: FetchCoordinator::new(harness.cache.clone(), harness.monitor.clone()),
      sync,
    };
    (harness, remote, services)
  }

  #[test]
  fn test_ttls() {
    assert_eq!(list_ttl(), Duration::minutes(30));
    assert_eq!(session_ttl(), Duration::minutes(60));
    assert_eq!(token_ttl(), Duration::minutes(24 * 60));
  }
}
