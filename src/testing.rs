//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::CacheLayer;
use crate::clock::ManualClock;
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::db::{Store, SyncKey};
use crate::remote::{ApiResponse, RemoteClient, RemoteRequest};
use crate::sync::{Mutation, MutationReplayer};

/// Probe with a settable answer.
#[derive(Debug)]
pub struct FixedProbe {
  reachable: AtomicBool,
  calls: AtomicUsize,
  delay: Option<Duration>,
}

impl FixedProbe {
  pub fn new(reachable: bool) -> Self {
    Self {
      reachable: AtomicBool::new(reachable),
      calls: AtomicUsize::new(0),
      delay: None,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn set(&self, reachable: bool) {
    self.reachable.store(reachable, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ReachabilityProbe for FixedProbe {
  async fn is_reachable(&self) -> bool {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.reachable.load(Ordering::SeqCst)
  }
}

type Handler = Box<dyn FnMut(&RemoteRequest) -> Result<ApiResponse<Value>> + Send>;

/// Remote client answering from a closure and recording every request.
pub struct FakeRemote {
  handler: Mutex<Handler>,
  requests: Mutex<Vec<RemoteRequest>>,
  token: Mutex<Option<String>>,
}

impl FakeRemote {
  pub fn new<F>(handler: F) -> Self
  where
    F: FnMut(&RemoteRequest) -> Result<ApiResponse<Value>> + Send + 'static,
  {
    Self {
      handler: Mutex::new(Box::new(handler)),
      requests: Mutex::new(Vec::new()),
      token: Mutex::new(None),
    }
  }

  /// Every request fails at the transport level.
  pub fn unreachable() -> Self {
    Self::new(|req| Err(eyre!("connection refused: {}", req.path)))
  }

  pub fn set_handler<F>(&self, handler: F)
  where
    F: FnMut(&RemoteRequest) -> Result<ApiResponse<Value>> + Send + 'static,
  {
    *self.handler.lock().unwrap() = Box::new(handler);
  }

  pub fn requests(&self) -> Vec<RemoteRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn token(&self) -> Option<String> {
    self.token.lock().unwrap().clone()
  }
}

#[async_trait]
impl RemoteClient for FakeRemote {
  async fn send(&self, request: RemoteRequest) -> Result<ApiResponse<Value>> {
    self.requests.lock().unwrap().push(request.clone());
    let mut handler = self.handler.lock().unwrap();
    (handler)(&request)
  }

  fn set_token(&self, token: Option<String>) {
    *self.token.lock().unwrap() = token;
  }

  fn has_token(&self) -> bool {
    self.token.lock().unwrap().is_some()
  }
}

/// Replayer that records every mutation and fails for chosen record ids.
#[derive(Default)]
pub struct RecordingReplayer {
  replayed: Mutex<Vec<Mutation>>,
  failing: Mutex<HashSet<String>>,
}

impl RecordingReplayer {
  pub fn fail_for(&self, record_id: &str) {
    self.failing.lock().unwrap().insert(record_id.to_string());
  }

  /// Fail only the mutation with this sync key.
  pub fn fail_key(&self, key: &SyncKey) {
    self.failing.lock().unwrap().insert(key.to_string());
  }

  pub fn succeed_for(&self, record_id: &str) {
    self.failing.lock().unwrap().remove(record_id);
  }

  pub fn replayed(&self) -> Vec<Mutation> {
    self.replayed.lock().unwrap().clone()
  }

  /// Record ids in replay order.
  pub fn replayed_ids(&self) -> Vec<String> {
    self
      .replayed()
      .iter()
      .map(|m| m.record_id().to_string())
      .collect()
  }
}

#[async_trait]
impl MutationReplayer for RecordingReplayer {
  async fn replay(&self, mutation: &Mutation) -> Result<()> {
    self.replayed.lock().unwrap().push(mutation.clone());
    let fails = {
      let failing = self.failing.lock().unwrap();
      failing.contains(mutation.record_id()) || failing.contains(&mutation.sync_key().to_string())
    };
    if fails {
      return Err(eyre!("HTTP 500 for {}", mutation.record_id()));
    }
    Ok(())
  }
}

/// Store, cache and monitor wired to a manual clock and a fixed probe.
pub struct Harness {
  pub clock: Arc<ManualClock>,
  pub probe: Arc<FixedProbe>,
  pub store: Arc<Store>,
  pub cache: CacheLayer,
  pub monitor: Arc<ConnectivityMonitor>,
}

impl Harness {
  pub async fn new(online: bool) -> Self {
    let clock = Arc::new(ManualClock::default());
    let probe = Arc::new(FixedProbe::new(online));
    let store = Arc::new(Store::open_in_memory(clock.clone()).unwrap());
    let cache = CacheLayer::new(store.clone(), clock.clone());
    let monitor = Arc::new(ConnectivityMonitor::new(probe.clone(), clock.clone()));
    monitor.recheck().await;
    Self {
      clock,
      probe,
      store,
      cache,
      monitor,
    }
  }

  pub async fn set_online(&self, online: bool) {
    self.probe.set(online);
    self.monitor.recheck().await;
  }
}
