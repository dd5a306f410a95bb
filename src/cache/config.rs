//! Cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Façade-level cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
  /// Application namespace prepended to every key (`{app_prefix}:cache:{key}`)
  #[serde(default = "default_app_prefix")]
  pub app_prefix: String,

  /// Maximum number of entries held by the in-process fallback store
  #[serde(default = "default_local_capacity")]
  pub local_capacity: usize,

  /// TTL applied when a caller passes zero seconds
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: u64,
}

fn default_app_prefix() -> String {
  "taskhub".to_string()
}

fn default_local_capacity() -> usize {
  1000
}

fn default_ttl_secs() -> u64 {
  300 // 5 minutes
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      app_prefix: default_app_prefix(),
      local_capacity: default_local_capacity(),
      default_ttl_secs: default_ttl_secs(),
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }
}

/// Connection settings for the shared Redis store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
  /// When false the façade runs on the local store only
  #[serde(default = "default_true")]
  pub enabled: bool,

  /// Full connection URL; takes precedence over host/port/password
  #[serde(default)]
  pub url: Option<String>,

  #[serde(default = "default_host")]
  pub host: String,

  #[serde(default = "default_redis_port")]
  pub port: u16,

  #[serde(default)]
  pub password: Option<String>,

  #[serde(default)]
  pub database: u8,

  #[serde(default)]
  pub tls_enabled: bool,

  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,

  #[serde(default = "default_command_timeout_ms")]
  pub command_timeout_ms: u64,

  /// Connection attempts before the client gives up for good
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,

  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,

  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms: u64,

  /// Consecutive command failures tolerated before the client reports unhealthy
  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,
}

fn default_true() -> bool {
  true
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_redis_port() -> u16 {
  6379
}

fn default_connect_timeout_ms() -> u64 {
  5000
}

fn default_command_timeout_ms() -> u64 {
  1000
}

fn default_max_retries() -> u32 {
  10
}

fn default_base_delay_ms() -> u64 {
  100
}

fn default_max_delay_ms() -> u64 {
  3000
}

fn default_failure_threshold() -> u32 {
  3
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      url: None,
      host: default_host(),
      port: default_redis_port(),
      password: None,
      database: 0,
      tls_enabled: false,
      connect_timeout_ms: default_connect_timeout_ms(),
      command_timeout_ms: default_command_timeout_ms(),
      max_retries: default_max_retries(),
      base_delay_ms: default_base_delay_ms(),
      max_delay_ms: default_max_delay_ms(),
      failure_threshold: default_failure_threshold(),
    }
  }
}

impl RedisConfig {
  /// Generate Redis connection URL
  pub fn connection_url(&self) -> String {
    if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
      return url.clone();
    }
    let scheme = if self.tls_enabled { "rediss" } else { "redis" };
    let auth = match &self.password {
      Some(pwd) if !pwd.is_empty() => format!(":{}@", pwd),
      _ => String::new(),
    };
    format!(
      "{}://{}{}:{}/{}",
      scheme, auth, self.host, self.port, self.database
    )
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn command_timeout(&self) -> Duration {
    Duration::from_millis(self.command_timeout_ms)
  }

  /// Backoff before retry number `attempt` (1-based), doubling up to `max_delay_ms`
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(self.max_delay_ms))
  }
}
