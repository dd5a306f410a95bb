//! Process services, built once at startup and shared by reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{CacheConfig, DualBackendCache, RedisCacheClient, RemoteCache};
use crate::coordinator::MutationInvalidationCoordinator;
use crate::realtime::{ConnectionRegistry, EventBroadcaster};
use crate::server::ServerConfig;

pub struct Services {
  redis: Option<Arc<RedisCacheClient>>,
  pub cache: Arc<DualBackendCache>,
  pub registry: Arc<ConnectionRegistry>,
  pub broadcaster: Arc<EventBroadcaster>,
  pub coordinator: Arc<MutationInvalidationCoordinator>,
  started: AtomicBool,
  stopped: AtomicBool,
}

impl Services {
  /// Wire every service from config. Redis is optional; a bad Redis URL
  /// only costs the remote backend, never startup.
  pub fn new(config: &ServerConfig) -> Self {
    let redis = if config.redis.enabled {
      match RedisCacheClient::new(config.redis.clone()) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
          tracing::warn!(error = %e, "redis client not created, using local cache only");
          None
        }
      }
    } else {
      tracing::info!("redis disabled, using local cache only");
      None
    };

    let remote = redis.clone().map(|r| r as Arc<dyn RemoteCache>);
    let mut services = Self::with_remote(&config.cache, remote);
    services.redis = redis;
    services
  }

  /// Wire services around any remote backend (or none)
  pub fn with_remote(cache: &CacheConfig, remote: Option<Arc<dyn RemoteCache>>) -> Self {
    let cache = Arc::new(DualBackendCache::new(cache, remote));
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Arc::new(EventBroadcaster::new(registry.clone()));
    let coordinator = Arc::new(MutationInvalidationCoordinator::new(
      cache.clone(),
      broadcaster.clone(),
    ));

    Self {
      redis: None,
      cache,
      registry,
      broadcaster,
      coordinator,
      started: AtomicBool::new(false),
      stopped: AtomicBool::new(false),
    }
  }

  pub fn redis(&self) -> Option<&Arc<RedisCacheClient>> {
    self.redis.as_ref()
  }

  /// Connect the remote store. Runs once; a failed connect leaves the
  /// cache on its local backend.
  pub async fn init(&self) {
    if self.started.swap(true, Ordering::SeqCst) {
      return;
    }
    if let Some(redis) = &self.redis {
      match redis.connect().await {
        Ok(()) => tracing::info!("redis cache connected"),
        Err(e) => tracing::warn!(error = %e, "redis unavailable, serving from local cache"),
      }
    }
  }

  /// Close the remote connection and drop every live session. Runs once,
  /// and turns a later `init()` into a no-op.
  pub async fn shutdown(&self) {
    if self.stopped.swap(true, Ordering::SeqCst) {
      return;
    }
    self.started.store(true, Ordering::SeqCst);
    let sessions = self.registry.close_all();
    if let Some(redis) = &self.redis {
      redis.disconnect().await;
    }
    tracing::info!(sessions, "services shut down");
  }
}
