//! The engine: one object owning the store, caches, queue and pipeline.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{ResponseCache, TtlPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::content::ContentCache;
use crate::interceptor::Pipeline;
use crate::migrate::{LegacyStore, MigrationReport, Migrator};
use crate::queue::{MutationQueue, ProcessOutcome, RetryPolicy, SyncProcessor};
use crate::store::{open_store, DurableStore, StoreName};
use crate::transport::{HttpTransport, RequestOptions, Transport, TransportResponse};

/// What `start` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
  pub pruned: usize,
  pub swept: usize,
  pub migration: Option<MigrationReport>,
  /// `None` when offline at startup
  pub sync: Option<ProcessOutcome>,
}

/// Counts for a quick look at local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
  pub persistent: bool,
  pub schema_version: u32,
  pub online: bool,
  pub cached_responses: usize,
  pub pending_mutations: usize,
  pub dead_letters: usize,
}

/// Offline-first engine. Each instance has its own store handle,
/// interceptor and sync processor, so several can coexist.
pub struct Engine {
  store: Arc<dyn DurableStore>,
  connectivity: Connectivity,
  cache: ResponseCache,
  content: ContentCache,
  queue: MutationQueue,
  processor: Arc<SyncProcessor>,
  transport: Arc<dyn Transport>,
  listener: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
  /// Assemble the engine around `transport`, which gets the offline-first
  /// pipeline put in front of it.
  pub fn new(
    config: &Config,
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    connectivity: Connectivity,
  ) -> Self {
    let cache = ResponseCache::new(store.clone(), clock.clone(), TtlPolicy::from_config(&config.ttl));
    let content = ContentCache::from_config(store.clone(), clock.clone(), &config.content);
    let queue = MutationQueue::new(store.clone(), clock.clone());

    let transport =
      Pipeline::offline_first(cache.clone(), queue.clone(), connectivity.clone()).wrap(transport);
    // Replays go through the same pipeline and are let past by their flag
    let processor = Arc::new(SyncProcessor::new(
      queue.clone(),
      transport.clone(),
      clock,
      RetryPolicy::from_config(&config.queue),
    ));

    Self {
      store,
      connectivity,
      cache,
      content,
      queue,
      processor,
      transport,
      listener: Mutex::new(None),
    }
  }

  /// The engine as configured: durable store from `storage`, HTTP transport
  /// from `api`, wall-clock time.
  pub fn from_config(config: &Config, connectivity: Connectivity) -> Result<Self> {
    let store = open_store(&config.storage);
    let transport = Arc::new(HttpTransport::new(&config.api)?);
    Ok(Self::new(config, store, transport, Arc::new(SystemClock), connectivity))
  }

  /// Startup housekeeping: prune expired responses, sweep old content,
  /// migrate legacy data, replay the queue if online, then listen for
  /// connectivity changes.
  pub async fn start(&self, legacy: Option<Arc<dyn LegacyStore>>) -> Result<StartupReport> {
    let mut report = StartupReport {
      pruned: self.cache.prune_expired()?,
      swept: self.content.sweep_expired()?,
      ..StartupReport::default()
    };

    if let Some(legacy) = legacy {
      let migrator = Migrator::new(legacy, self.content.clone());
      if migrator.needs_migration()? {
        report.migration = Some(migrator.run());
      }
    }

    report.sync = self.processor.process_if_online(&self.connectivity).await?;
    self.listen();
    info!(
      pruned = report.pruned,
      swept = report.swept,
      online = self.connectivity.is_online(),
      "Engine started"
    );
    Ok(report)
  }

  /// Start the reconnect listener unless it is already running.
  fn listen(&self) {
    let mut listener = match self.listener.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    if listener.as_ref().is_some_and(|h| !h.is_finished()) {
      return;
    }
    *listener = Some(self.processor.clone().spawn_listener(&self.connectivity));
  }

  /// Stop the reconnect listener.
  pub fn shutdown(&self) {
    let handle = match self.listener.lock() {
      Ok(mut guard) => guard.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(handle) = handle {
      handle.abort();
    }
  }

  /// Send a request through the offline-first pipeline.
  pub async fn request(&self, options: RequestOptions) -> Result<TransportResponse> {
    self.transport.request(options).await
  }

  /// Replay the queue now.
  pub async fn sync(&self) -> Result<ProcessOutcome> {
    self.processor.process_all().await
  }

  pub fn status(&self) -> Result<EngineStatus> {
    let schema_version = self.store.schema_version().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to read schema version");
      0
    });
    Ok(EngineStatus {
      persistent: self.store.is_persistent(),
      schema_version,
      online: self.connectivity.is_online(),
      cached_responses: self.cache.len()?,
      pending_mutations: self.queue.len()?,
      dead_letters: self.store.count(StoreName::DeadLetters)?,
    })
  }

  /// Forget everything cached for a user.
  pub fn clear_owner(&self, owner_id: &str) -> Result<usize> {
    Ok(self.cache.clear_for_owner(owner_id)? + self.content.clear_owner(owner_id)?)
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  pub fn content(&self) -> &ContentCache {
    &self.content
  }

  pub fn queue(&self) -> &MutationQueue {
    &self.queue
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    self.shutdown();
  }
}
