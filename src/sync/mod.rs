//! Write path: push to the server when possible, queue durably otherwise.
//!
//! Every write is identified by a [`SyncKey`]. Offline or failed writes are
//! upserted into the queue under that key, so repeated edits of the same
//! record collapse into one pending row holding the latest payload. The
//! queue is drained oldest first once connectivity returns.

mod mutation;
mod policy;
mod replay;

use color_eyre::Result;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityMonitor;
use crate::db::{NewQueueRow, QueueRow, QueueStatus, Store, SyncKey};
use crate::models::Entity;

pub use mutation::{Change, CustomMutation, Mutation, OperationKind};
pub use policy::RetryPolicy;
pub use replay::{MutationReplayer, RemoteReplayer};

/// Message returned when a write was stored for later.
pub const QUEUED_MESSAGE: &str = "saved locally, will sync later";

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncResult<T> {
  /// The server accepted the write
  Synced(T),
  /// Offline; the write is queued
  Queued { message: String },
  /// The server call failed; the write is queued anyway unless the message says otherwise
  Failed { message: String },
}

impl<T> SyncResult<T> {
  pub fn queued() -> Self {
    Self::Queued {
      message: QUEUED_MESSAGE.to_string(),
    }
  }

  pub fn is_synced(&self) -> bool {
    matches!(self, Self::Synced(_))
  }

  pub fn message(&self) -> Option<&str> {
    match self {
      Self::Synced(_) => None,
      Self::Queued { message } | Self::Failed { message } => Some(message),
    }
  }

  pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> SyncResult<U> {
    match self {
      Self::Synced(value) => SyncResult::Synced(f(value)),
      Self::Queued { message } => SyncResult::Queued { message },
      Self::Failed { message } => SyncResult::Failed { message },
    }
  }
}

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Not connected; nothing was attempted
  pub skipped: bool,
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Rows that ran out of attempts during this drain
  pub abandoned: usize,
  /// Rows left alone: waiting for backoff or already abandoned
  pub deferred: usize,
  /// Connectivity dropped before the drain finished
  pub interrupted: bool,
}

enum Replayed {
  Synced,
  Failed(QueueStatus),
}

/// Coordinates writes between the server and the local queue.
pub struct SyncCoordinator {
  store: Arc<Store>,
  connectivity: Arc<ConnectivityMonitor>,
  replayer: Arc<dyn MutationReplayer>,
  policy: RetryPolicy,
  drain_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SyncCoordinator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncCoordinator")
      .field("policy", &self.policy)
      .finish_non_exhaustive()
  }
}

impl SyncCoordinator {
  pub fn new(
    store: Arc<Store>,
    connectivity: Arc<ConnectivityMonitor>,
    replayer: Arc<dyn MutationReplayer>,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      store,
      connectivity,
      replayer,
      policy,
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  pub fn policy(&self) -> RetryPolicy {
    self.policy
  }

  fn enqueue(&self, mutation: &Mutation) -> Result<SyncKey> {
    let key = mutation.sync_key();
    let payload = mutation.to_payload()?;
    self.store.enqueue(NewQueueRow {
      key: &key,
      payload: &payload,
    })?;
    tracing::info!(event = "mutation_enqueued", key = %key, "mutation queued for later sync");
    Ok(key)
  }

  /// Apply a write now if connected, otherwise queue it.
  ///
  /// `upload` performs the server call. It is only invoked when connected.
  /// A failed upload still leaves the mutation queued, so the write is never
  /// lost; only a failing local store can make it so, and the returned
  /// message says as much.
  pub async fn sync_to_server<T, U, UFut>(&self, mutation: &Mutation, upload: U) -> SyncResult<T>
  where
    U: FnOnce() -> UFut,
    UFut: Future<Output = Result<T>>,
  {
    self
      .sync_all_to_server(std::slice::from_ref(mutation), upload)
      .await
  }

  /// Like [`sync_to_server`](Self::sync_to_server) for a write the server
  /// applies in one call (e.g. a batch create). Offline or on failure, each
  /// mutation is queued on its own.
  pub async fn sync_all_to_server<T, U, UFut>(
    &self,
    mutations: &[Mutation],
    upload: U,
  ) -> SyncResult<T>
  where
    U: FnOnce() -> UFut,
    UFut: Future<Output = Result<T>>,
  {
    if !self.connectivity.is_connected() {
      return match self.enqueue_all(mutations) {
        Ok(()) => SyncResult::queued(),
        Err(e) => SyncResult::Failed {
          message: format!("Failed to save change locally: {}", e),
        },
      };
    }

    match upload().await {
      Ok(value) => {
        for mutation in mutations {
          let key = mutation.sync_key();
          if let Err(e) = self.store.dequeue(&key) {
            tracing::warn!(key = %key, error = %e, "failed to clear queued copy of synced write");
          }
          tracing::debug!(key = %key, "write synced");
        }
        SyncResult::Synced(value)
      }
      Err(upload_error) => {
        tracing::warn!(count = mutations.len(), error = %upload_error, "upload failed; queuing write");
        let message = match self.enqueue_all(mutations) {
          Ok(()) => upload_error.to_string(),
          Err(e) => format!("{}; failed to save change locally: {}", upload_error, e),
        };
        SyncResult::Failed { message }
      }
    }
  }

  fn enqueue_all(&self, mutations: &[Mutation]) -> Result<()> {
    for mutation in mutations {
      if let Err(e) = self.enqueue(mutation) {
        tracing::error!(key = %mutation.sync_key(), error = %e, "failed to queue write");
        return Err(e);
      }
    }
    Ok(())
  }

  /// Keep a local copy of a written record, flagged by whether the server has it.
  pub fn save_local<T: Entity>(&self, record: &T, synced: bool) -> Result<()> {
    self.store.save_entity(record, synced)
  }

  pub fn save_local_batch<T: Entity>(&self, records: &[T], synced: bool) -> Result<()> {
    self.store.save_entities(records, synced)
  }

  pub fn remove_local<T: Entity>(&self, id: &str) -> Result<bool> {
    self.store.delete_entity::<T>(id)
  }

  /// True once nothing is left in the queue for the record, so its local
  /// copy matches what the server has.
  pub(crate) fn is_settled(&self, entity_type: &str, id: &str) -> Result<bool> {
    Ok(!self.store.has_queued_for(entity_type, id)?)
  }

  /// Store server copies of records, except where the local copy still has
  /// changes the server has not seen.
  pub fn absorb_remote<T: Entity>(&self, records: &[T]) -> Result<usize> {
    let mut fresh = Vec::with_capacity(records.len());
    for record in records {
      match self.store.load_entity::<T>(record.id())? {
        Some(local) if !local.is_synced() => {
          tracing::debug!(entity_type = T::entity_type(), id = record.id(), "keeping unsynced local copy");
        }
        _ => fresh.push(record.clone()),
      }
    }
    self.store.save_entities(&fresh, true)?;
    Ok(fresh.len())
  }

  /// Replay queued mutations, oldest first, one at a time.
  ///
  /// Failures are recorded on the row and do not stop the drain. Only one
  /// drain runs at a time; a second caller waits for the first to finish.
  pub async fn perform_batch_sync(&self) -> Result<DrainReport> {
    let _guard = self.drain_lock.lock().await;

    if !self.connectivity.is_connected() {
      tracing::debug!("not connected; skipping drain");
      return Ok(DrainReport {
        skipped: true,
        ..DrainReport::default()
      });
    }

    let now = self.store.now();
    let rows = self.store.queued()?;
    let mut report = DrainReport::default();

    for row in rows {
      if !self.policy.is_due(&row, now) {
        report.deferred += 1;
        continue;
      }
      if !self.connectivity.is_connected() {
        tracing::info!(key = %row.key, "connectivity lost; stopping drain");
        report.interrupted = true;
        break;
      }

      report.attempted += 1;
      match self.replay_row(&row).await? {
        Replayed::Synced => report.succeeded += 1,
        Replayed::Failed(status) => {
          report.failed += 1;
          if status == QueueStatus::Abandoned {
            report.abandoned += 1;
          }
        }
      }
    }

    tracing::info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      failed = report.failed,
      deferred = report.deferred,
      "drain finished"
    );
    Ok(report)
  }

  /// `Err` only for store failures.
  async fn replay_row(&self, row: &QueueRow) -> Result<Replayed> {
    let mutation = match row.mutation() {
      Ok(mutation) => mutation,
      Err(e) => {
        tracing::error!(key = %row.key, error = %e, "abandoning unreadable queued mutation");
        self
          .store
          .record_queue_failure(row.id, &e.to_string(), QueueStatus::Abandoned, None)?;
        return Ok(Replayed::Failed(QueueStatus::Abandoned));
      }
    };

    self.store.set_queue_status(row.id, QueueStatus::Syncing)?;

    match self.replayer.replay(&mutation).await {
      Ok(()) => {
        self.store.dequeue_id(row.id)?;
        if let Some((entity_type, id)) = mutation.synced_entity() {
          let flagged = self
            .is_settled(entity_type, id)
            .and_then(|settled| {
              if settled {
                self.store.mark_entity_synced(entity_type, id)
              } else {
                Ok(false)
              }
            });
          if let Err(e) = flagged {
            tracing::warn!(key = %row.key, error = %e, "failed to flag local record as synced");
          }
        }
        tracing::info!(event = "drain_item_success", key = %row.key, "queued mutation synced");
        Ok(Replayed::Synced)
      }
      Err(e) => {
        let (status, next_attempt_at) = self
          .policy
          .after_failure(row.retry_count + 1, self.store.now());
        let retry_count =
          self
            .store
            .record_queue_failure(row.id, &e.to_string(), status, next_attempt_at)?;
        tracing::warn!(
          event = "drain_item_failure",
          key = %row.key,
          retry_count = ?retry_count,
          status = status.as_str(),
          error = %e,
          "queued mutation failed to sync"
        );
        Ok(Replayed::Failed(status))
      }
    }
  }

  /// Drain in the background every time connectivity comes back.
  pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    let mut transitions = self.connectivity.transitions();

    tokio::spawn(async move {
      loop {
        let connected = match transitions.recv().await {
          Ok(state) => state.is_connected,
          Err(RecvError::Lagged(missed)) => {
            tracing::warn!(missed, "missed connectivity transitions");
            coordinator.connectivity.is_connected()
          }
          Err(RecvError::Closed) => break,
        };
        if !connected {
          continue;
        }

        if let Err(e) = coordinator.perform_batch_sync().await {
          tracing::error!(error = %e, "background drain failed");
        }
      }
    })
  }

  /// Queued rows in drain order.
  pub fn pending(&self) -> Result<Vec<QueueRow>> {
    self.store.queued()
  }

  pub fn pending_count(&self) -> Result<usize> {
    self.store.queue_len(None)
  }

  /// Drop a queued mutation without sending it.
  pub fn discard(&self, key: &SyncKey) -> Result<bool> {
    let removed = self.store.dequeue(key)?;
    if removed {
      tracing::info!(key = %key, "discarded queued mutation");
    }
    Ok(removed)
  }

  /// Put abandoned rows back in line with a fresh retry budget.
  pub fn retry_abandoned(&self) -> Result<usize> {
    self.store.revive_abandoned()
  }
}
