//! Connectivity state machine.
//!
//! The platform reports coarse transport signals ("wifi up", "no network").
//! A loss is believed immediately; a gain is only believed once a
//! reachability probe confirms it. Subscribers hear about changes of the
//! resulting boolean, never about repeated identical signals.

mod probe;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::clock::Clock;

pub use probe::{DnsProbe, ReachabilityProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
  None,
  Wifi,
  Cellular,
  Ethernet,
  Other,
}

/// Raw signal from the platform's network callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
  /// No usable transport
  Unavailable,
  /// A transport came up; not yet verified
  Available(TransportKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
  pub is_connected: bool,
  pub transport: TransportKind,
  pub last_changed_at: DateTime<Utc>,
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&ConnectivityState) + Send + Sync>;

/// Tracks whether the remote side is reachable.
///
/// State is only ever written by [`handle_signal`](Self::handle_signal) and
/// [`recheck`](Self::recheck).
pub struct ConnectivityMonitor {
  probe: Arc<dyn ReachabilityProbe>,
  clock: Arc<dyn Clock>,
  state: Mutex<ConnectivityState>,
  subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
  next_subscription: AtomicU64,
  /// Bumped on every signal; a probe result is discarded if a newer signal arrived meanwhile
  generation: AtomicU64,
  transitions: broadcast::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
  /// Starts out disconnected until a signal or [`recheck`](Self::recheck) says otherwise.
  pub fn new(probe: Arc<dyn ReachabilityProbe>, clock: Arc<dyn Clock>) -> Self {
    let (transitions, _) = broadcast::channel(16);
    let state = ConnectivityState {
      is_connected: false,
      transport: TransportKind::None,
      last_changed_at: clock.now(),
    };

    Self {
      probe,
      clock,
      state: Mutex::new(state),
      subscribers: Mutex::new(Vec::new()),
      next_subscription: AtomicU64::new(1),
      generation: AtomicU64::new(0),
      transitions,
    }
  }

  fn lock_state(&self) -> MutexGuard<'_, ConnectivityState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn lock_subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
    self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn is_connected(&self) -> bool {
    self.lock_state().is_connected
  }

  pub fn state(&self) -> ConnectivityState {
    self.lock_state().clone()
  }

  /// Register a callback invoked on every change of `is_connected`.
  pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&ConnectivityState) + Send + Sync + 'static,
  {
    let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
    self.lock_subscribers().push((id, Arc::new(callback)));
    id
  }

  /// Returns whether the subscription existed.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut subscribers = self.lock_subscribers();
    let before = subscribers.len();
    subscribers.retain(|(sub_id, _)| *sub_id != id);
    subscribers.len() != before
  }

  /// Async stream of published states, for tasks that react to transitions.
  pub fn transitions(&self) -> broadcast::Receiver<ConnectivityState> {
    self.transitions.subscribe()
  }

  /// Feed a platform signal. Returns the resulting connectivity.
  pub async fn handle_signal(&self, signal: TransportSignal) -> bool {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

    match signal {
      TransportSignal::Unavailable => {
        self.publish(false, TransportKind::None);
        false
      }
      TransportSignal::Available(kind) => {
        let reachable = self.probe.is_reachable().await;
        if self.generation.load(Ordering::SeqCst) != generation {
          tracing::debug!(?kind, reachable, "discarding probe result superseded by a newer signal");
          return self.is_connected();
        }
        self.publish(reachable, kind);
        reachable
      }
    }
  }

  /// Probe now, regardless of the last signal.
  pub async fn recheck(&self) -> bool {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let reachable = self.probe.is_reachable().await;
    if self.generation.load(Ordering::SeqCst) != generation {
      return self.is_connected();
    }

    let transport = match self.lock_state().transport {
      TransportKind::None if reachable => TransportKind::Other,
      kind => kind,
    };
    self.publish(reachable, transport);
    reachable
  }

  /// Update state and notify if `is_connected` flipped.
  fn publish(&self, connected: bool, transport: TransportKind) {
    let snapshot = {
      let mut state = self.lock_state();
      state.transport = transport;
      if state.is_connected == connected {
        return;
      }
      state.is_connected = connected;
      state.last_changed_at = self.clock.now();
      state.clone()
    };

    tracing::info!(
      connected = snapshot.is_connected,
      transport = ?snapshot.transport,
      "connectivity changed"
    );

    // Call outside the lock so a subscriber may query or unsubscribe
    let subscribers: Vec<(SubscriptionId, Subscriber)> = self.lock_subscribers().clone();
    for (id, callback) in subscribers {
      if catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
        tracing::error!(subscription = id.0, "connectivity subscriber panicked");
      }
    }

    // No receivers is fine
    let _ = self.transitions.send(snapshot);
  }
}

impl std::fmt::Debug for ConnectivityMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectivityMonitor")
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}
