//! Cache entry types

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// An entry held by the in-process store.
///
/// The value is the caller's already-serialized payload; the cache never
/// inspects its shape.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub value: String,
  pub stored_at: Instant,
  pub ttl: Duration,
  /// Size in bytes (approximate)
  pub size: usize,
}

impl CacheEntry {
  pub fn new(key: String, value: String, ttl: Duration) -> Self {
    let size = key.len() + value.len();
    Self {
      key,
      value,
      stored_at: Instant::now(),
      ttl,
      size,
    }
  }

  /// Live iff `now - stored_at <= ttl`
  pub fn is_live(&self) -> bool {
    self.stored_at.elapsed() <= self.ttl
  }

  pub fn ttl_remaining(&self) -> Option<Duration> {
    self.ttl.checked_sub(self.stored_at.elapsed())
  }

  /// Restart the entry's lifetime with a new TTL
  pub fn renew(&mut self, ttl: Duration) {
    self.stored_at = Instant::now();
    self.ttl = ttl;
  }
}

/// Wire form of an entry in the shared store.
///
/// Carries its own timestamp so liveness is checked on read even if the
/// store's expiry has not fired yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
  pub value: String,
  pub stored_at_ms: i64,
  pub ttl_ms: u64,
}

impl RemoteEnvelope {
  pub fn new(value: String, ttl: Duration) -> Self {
    Self {
      value,
      stored_at_ms: Utc::now().timestamp_millis(),
      ttl_ms: ttl.as_millis() as u64,
    }
  }

  pub fn is_live(&self) -> bool {
    self.age_ms() <= self.ttl_ms
  }

  pub fn ttl_remaining(&self) -> Option<Duration> {
    self
      .ttl_ms
      .checked_sub(self.age_ms())
      .map(Duration::from_millis)
  }

  fn age_ms(&self) -> u64 {
    let age = Utc::now().timestamp_millis() - self.stored_at_ms;
    age.max(0) as u64
  }

  pub fn encode(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(raw)
  }
}

/// Whole seconds remaining, rounded up so a fresh 60s entry reports 60
pub(crate) fn ceil_secs(remaining: Duration) -> i64 {
  let millis = remaining.as_millis();
  ((millis + 999) / 1000) as i64
}
