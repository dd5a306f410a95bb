//! Best-effort cache with transparent failover
//!
//! Provides:
//! - A bounded in-process store with oldest-first eviction
//! - A Redis client with health tracking, backoff and timeouts
//! - A façade routing each call to whichever store is usable

pub mod config;
mod dual;
mod entry;
mod local;
pub mod pattern;
pub mod remote;

pub use config::{CacheConfig, RedisConfig};
pub use dual::{CacheBackendKind, CacheStats, DualBackendCache};
pub use entry::{CacheEntry, RemoteEnvelope};
pub use local::BoundedLocalCache;
pub use pattern::KeyNamespace;
pub use remote::{
  ConnectionState, RedisCacheClient, RemoteCache, RemoteCommand, RemoteError, RemoteReply,
};
