//! Builds every service once and hands out shared references.

use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{CacheLayer, CacheStorage, NoopStorage};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, DnsProbe, ReachabilityProbe};
use crate::db::Store;
use crate::fetch::FetchCoordinator;
use crate::remote::{HttpRemoteClient, RemoteClient};
use crate::repos::{
  AuthRepository, GradeRepository, Services, StudentRepository, SubjectRepository,
};
use crate::sync::{RemoteReplayer, SyncCoordinator};

pub struct Context {
  pub config: Config,
  pub store: Arc<Store>,
  pub client: Arc<dyn RemoteClient>,
  pub monitor: Arc<ConnectivityMonitor>,
  pub fetcher: FetchCoordinator,
  pub sync: Arc<SyncCoordinator>,
  pub students: StudentRepository,
  pub grades: GradeRepository,
  pub subjects: SubjectRepository,
  pub auth: AuthRepository,
}

impl Context {
  /// Open the database, build the HTTP client and the DNS probe from `config`.
  pub fn new(config: Config) -> Result<Self> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(Store::open(config.storage.path.as_deref(), clock.clone())?);

    let client = Arc::new(HttpRemoteClient::new(
      &config.remote.base_url,
      config.remote.timeout(),
    )?);
    if let Some(token) = Config::api_token() {
      client.set_token(Some(token));
    }

    let probe = Arc::new(DnsProbe::new(
      config.connectivity.probe_hosts.clone(),
      config.connectivity.probe_timeout(),
    ));

    Ok(Self::with_parts(config, clock, store, client, probe))
  }

  /// Wire already-built parts together. Nothing runs in the background
  /// until [`start`](Self::start) is called.
  pub fn with_parts(
    config: Config,
    clock: Arc<dyn Clock>,
    store: Arc<Store>,
    client: Arc<dyn RemoteClient>,
    probe: Arc<dyn ReachabilityProbe>,
  ) -> Self {
    let storage: Arc<dyn CacheStorage> = if config.cache.enabled {
      store.clone() as Arc<dyn CacheStorage>
    } else {
      tracing::info!("caching disabled");
      Arc::new(NoopStorage)
    };
    let cache = CacheLayer::new(storage, clock.clone());
    let monitor = Arc::new(ConnectivityMonitor::new(probe, clock));
    let fetcher = FetchCoordinator::new(cache, monitor.clone());
    let sync = Arc::new(SyncCoordinator::new(
      store.clone(),
      monitor.clone(),
      Arc::new(RemoteReplayer::new(client.clone())),
      config.sync.retry_policy(),
    ));

    let services = Services {
      client: client.clone(),
      store: store.clone(),
      fetcher: fetcher.clone(),
      sync: sync.clone(),
    };

    Self {
      config,
      store,
      client,
      monitor,
      fetcher,
      sync,
      students: StudentRepository::new(services.clone()),
      grades: GradeRepository::new(services.clone()),
      subjects: SubjectRepository::new(services.clone()),
      auth: AuthRepository::new(services),
    }
  }

  /// Spawn the background drain, then probe once so writes queued by an
  /// earlier run go out as soon as the server is reachable.
  ///
  /// The drain task lives until the handle is aborted or the monitor is dropped.
  pub async fn start(&self) -> JoinHandle<()> {
    let handle = self.sync.start();
    let was_connected = self.monitor.is_connected();

    // Already online means no transition, so drain directly
    if self.monitor.recheck().await && was_connected {
      if let Err(e) = self.sync.perform_batch_sync().await {
        tracing::error!(error = %e, "startup drain failed");
      }
    }
    handle
  }
}
