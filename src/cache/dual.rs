//! Look-aside cache façade over the shared store and the local fallback
//!
//! Each call goes to the remote store while it reports healthy. A failed
//! remote call is logged and retried against the local store for that call
//! only. Nothing here returns an error to the caller.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::config::CacheConfig;
use super::entry::{ceil_secs, RemoteEnvelope};
use super::local::BoundedLocalCache;
use super::pattern::KeyNamespace;
use super::remote::{parse_info_field, RemoteCache, RemoteCommand, RemoteError, RemoteReply};

/// Keys per `DEL` when bulk-deleting enumerated keys
const DELETE_BATCH: usize = 500;

/// Which store answered a stats query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
  Remote,
  Local,
}

/// Cache statistics, accumulated at the façade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub backend: CacheBackendKind,
  pub size: usize,
  /// Always -1: the shared store is not bounded by entry count
  pub max_size: i64,
  pub hits: u64,
  pub misses: u64,
  pub hit_rate: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory_usage: Option<u64>,
}

impl CacheStats {
  pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
      0.0
    } else {
      hits as f64 / total as f64
    }
  }
}

pub struct DualBackendCache {
  namespace: KeyNamespace,
  remote: Option<Arc<dyn RemoteCache>>,
  local: BoundedLocalCache,
  default_ttl: Duration,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl DualBackendCache {
  pub fn new(config: &CacheConfig, remote: Option<Arc<dyn RemoteCache>>) -> Self {
    Self {
      namespace: KeyNamespace::new(&config.app_prefix),
      remote,
      local: BoundedLocalCache::new(config.local_capacity),
      default_ttl: config.default_ttl(),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Local-only façade
  pub fn local_only(config: &CacheConfig) -> Self {
    Self::new(config, None)
  }

  pub fn namespace(&self) -> &KeyNamespace {
    &self.namespace
  }

  pub fn local(&self) -> &BoundedLocalCache {
    &self.local
  }

  pub fn is_remote_healthy(&self) -> bool {
    self.healthy_remote().is_some()
  }

  fn healthy_remote(&self) -> Option<&Arc<dyn RemoteCache>> {
    self.remote.as_ref().filter(|r| r.is_healthy())
  }

  fn effective_ttl(&self, ttl_secs: u64) -> Duration {
    if ttl_secs == 0 {
      self.default_ttl
    } else {
      Duration::from_secs(ttl_secs)
    }
  }

  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let full_key = self.namespace.key(key);

    let raw = match self.healthy_remote() {
      Some(remote) => match remote_get(remote.as_ref(), &full_key).await {
        Ok(envelope) => envelope.map(|e| e.value),
        Err(e) => {
          tracing::warn!(key = %full_key, error = %e, "remote get failed, using local cache");
          self.local.get(&full_key)
        }
      },
      None => self.local.get(&full_key),
    };

    let value = raw.and_then(|raw| match serde_json::from_str::<T>(&raw) {
      Ok(value) => Some(value),
      Err(e) => {
        tracing::warn!(key = %full_key, error = %e, "cached value does not decode as requested type");
        None
      }
    });

    if value.is_some() {
      self.hits.fetch_add(1, Ordering::Relaxed);
      tracing::debug!(key = %full_key, "cache hit");
    } else {
      self.misses.fetch_add(1, Ordering::Relaxed);
      tracing::debug!(key = %full_key, "cache miss");
    }
    value
  }

  /// Store a value. `ttl_secs == 0` uses the configured default TTL.
  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) {
    let full_key = self.namespace.key(key);
    let payload = match serde_json::to_string(value) {
      Ok(payload) => payload,
      Err(e) => {
        tracing::warn!(key = %full_key, error = %e, "value not serializable, not cached");
        return;
      }
    };
    let ttl = self.effective_ttl(ttl_secs);

    if let Some(remote) = self.healthy_remote() {
      match remote_set(remote.as_ref(), &full_key, RemoteEnvelope::new(payload.clone(), ttl)).await
      {
        Ok(()) => {
          // a copy from an earlier outage must not outlive the new value
          self.local.delete(&full_key);
          return;
        }
        Err(e) => {
          tracing::warn!(key = %full_key, error = %e, "remote set failed, using local cache");
        }
      }
    }
    self.local.set(&full_key, payload, ttl);
  }

  /// Remove a key. The local copy is always dropped too so a later
  /// outage never resurfaces a value invalidated while the remote was up.
  pub async fn delete(&self, key: &str) {
    let full_key = self.namespace.key(key);
    if let Some(remote) = self.healthy_remote() {
      let command = RemoteCommand::Del {
        keys: vec![full_key.clone()],
      };
      if let Err(e) = remote.execute(command).await {
        tracing::warn!(key = %full_key, error = %e, "remote delete failed");
      }
    }
    self.local.delete(&full_key);
  }

  /// Delete every key starting with `pattern` (a trailing `*` is optional).
  /// Returns the number of keys removed across both stores.
  pub async fn delete_pattern(&self, pattern: &str) -> usize {
    let mut removed = 0;
    if let Some(remote) = self.healthy_remote() {
      let glob = self.namespace.glob(pattern);
      match remote_delete_matching(remote.as_ref(), glob).await {
        Ok(count) => removed += count,
        Err(e) => {
          tracing::warn!(pattern = %pattern, error = %e, "remote pattern delete failed");
        }
      }
    }
    removed += self.local.delete_prefix(&self.namespace.prefix(pattern));
    tracing::debug!(pattern = %pattern, removed, "pattern invalidated");
    removed
  }

  pub async fn exists(&self, key: &str) -> bool {
    let full_key = self.namespace.key(key);
    if let Some(remote) = self.healthy_remote() {
      match remote_get(remote.as_ref(), &full_key).await {
        Ok(envelope) => return envelope.is_some(),
        Err(e) => {
          tracing::warn!(key = %full_key, error = %e, "remote exists failed, using local cache");
        }
      }
    }
    self.local.exists(&full_key)
  }

  /// Seconds remaining, or -1 when the key is absent
  pub async fn get_ttl(&self, key: &str) -> i64 {
    let full_key = self.namespace.key(key);
    if let Some(remote) = self.healthy_remote() {
      match remote_get(remote.as_ref(), &full_key).await {
        Ok(envelope) => {
          return envelope
            .and_then(|e| e.ttl_remaining())
            .map(ceil_secs)
            .unwrap_or(-1)
        }
        Err(e) => {
          tracing::warn!(key = %full_key, error = %e, "remote ttl failed, using local cache");
        }
      }
    }
    self
      .local
      .ttl_remaining(&full_key)
      .map(ceil_secs)
      .unwrap_or(-1)
  }

  /// Restart a live key's lifetime at `ttl_secs` from now. Like `EXPIRE`,
  /// `ttl_secs == 0` expires the key immediately. Returns whether the key
  /// was live.
  pub async fn extend(&self, key: &str, ttl_secs: u64) -> bool {
    if ttl_secs == 0 {
      let live = self.exists(key).await;
      if live {
        self.delete(key).await;
      }
      return live;
    }

    let full_key = self.namespace.key(key);
    let ttl = Duration::from_secs(ttl_secs);
    if let Some(remote) = self.healthy_remote() {
      match remote_extend(remote.as_ref(), &full_key, ttl).await {
        Ok(extended) => {
          self.local.delete(&full_key);
          return extended;
        }
        Err(e) => {
          tracing::warn!(key = %full_key, error = %e, "remote extend failed, using local cache");
        }
      }
    }
    self.local.extend(&full_key, ttl)
  }

  /// Remove every key in this application's namespace. The shared store is
  /// enumerated and bulk-deleted, never flushed.
  pub async fn clear(&self) {
    if let Some(remote) = self.healthy_remote() {
      match remote_delete_matching(remote.as_ref(), self.namespace.all()).await {
        Ok(count) => tracing::info!(removed = count, "remote cache namespace cleared"),
        Err(e) => tracing::warn!(error = %e, "remote clear failed"),
      }
    }
    self.local.clear();
  }

  pub async fn stats(&self) -> CacheStats {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let hit_rate = CacheStats::hit_rate(hits, misses);

    if let Some(remote) = self.healthy_remote() {
      if let Ok(stats) = remote_size_and_memory(remote.as_ref(), self.namespace.all()).await {
        return CacheStats {
          backend: CacheBackendKind::Remote,
          size: stats.0,
          max_size: -1,
          hits,
          misses,
          hit_rate,
          memory_usage: stats.1,
        };
      }
    }

    CacheStats {
      backend: CacheBackendKind::Local,
      size: self.local.len(),
      max_size: -1,
      hits,
      misses,
      hit_rate,
      memory_usage: Some(self.local.memory_used() as u64),
    }
  }

  /// Look-aside read: return the cached value or load, store and return it.
  /// Loader errors are passed through and nothing is cached.
  pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl_secs: u64, loader: F) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    if let Some(cached) = self.get::<T>(key).await {
      return Ok(cached);
    }
    let value = loader().await?;
    self.set(key, &value, ttl_secs).await;
    Ok(value)
  }
}

async fn remote_get(
  remote: &dyn RemoteCache,
  full_key: &str,
) -> Result<Option<RemoteEnvelope>, RemoteError> {
  let reply = remote
    .execute(RemoteCommand::Get {
      key: full_key.to_string(),
    })
    .await?;
  let Some(raw) = reply.into_string() else {
    return Ok(None);
  };

  match RemoteEnvelope::decode(&raw) {
    Ok(envelope) if envelope.is_live() => Ok(Some(envelope)),
    Ok(_) => {
      remote_delete_quietly(remote, full_key).await;
      Ok(None)
    }
    Err(e) => {
      tracing::warn!(key = %full_key, error = %e, "dropping malformed remote entry");
      remote_delete_quietly(remote, full_key).await;
      Ok(None)
    }
  }
}

async fn remote_delete_quietly(remote: &dyn RemoteCache, full_key: &str) {
  let command = RemoteCommand::Del {
    keys: vec![full_key.to_string()],
  };
  if let Err(e) = remote.execute(command).await {
    tracing::debug!(key = %full_key, error = %e, "remote cleanup delete failed");
  }
}

async fn remote_set(
  remote: &dyn RemoteCache,
  full_key: &str,
  envelope: RemoteEnvelope,
) -> Result<(), RemoteError> {
  let ttl = Duration::from_millis(envelope.ttl_ms);
  let value = envelope
    .encode()
    .map_err(|e| RemoteError::Decode(e.to_string()))?;
  remote
    .execute(RemoteCommand::Set {
      key: full_key.to_string(),
      value,
      ttl,
    })
    .await?;
  Ok(())
}

async fn remote_extend(
  remote: &dyn RemoteCache,
  full_key: &str,
  ttl: Duration,
) -> Result<bool, RemoteError> {
  let Some(mut envelope) = remote_get(remote, full_key).await? else {
    return Ok(false);
  };
  let renewed = RemoteEnvelope::new(std::mem::take(&mut envelope.value), ttl);
  remote_set(remote, full_key, renewed).await?;
  Ok(true)
}

async fn remote_delete_matching(remote: &dyn RemoteCache, glob: String) -> Result<usize, RemoteError> {
  let keys = remote
    .execute(RemoteCommand::Keys { pattern: glob })
    .await?
    .into_array();

  let mut removed = 0usize;
  for chunk in keys.chunks(DELETE_BATCH) {
    let reply = remote
      .execute(RemoteCommand::Del {
        keys: chunk.to_vec(),
      })
      .await?;
    removed += reply.as_i64().unwrap_or(0).max(0) as usize;
  }
  Ok(removed)
}

async fn remote_size_and_memory(
  remote: &dyn RemoteCache,
  glob: String,
) -> Result<(usize, Option<u64>), RemoteError> {
  let size = remote
    .execute(RemoteCommand::Keys { pattern: glob })
    .await?
    .into_array()
    .len();
  let memory = match remote.execute(RemoteCommand::Info).await {
    Ok(RemoteReply::Bulk(info)) => parse_info_field(&info, "used_memory"),
    _ => None,
  };
  Ok((size, memory))
}
