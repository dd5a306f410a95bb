use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{CacheConfig, RedisConfig};
use crate::realtime::AuthConfig;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
pub(crate) fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  while let Some(start) = result.find("${") {
    if let Some(end) = result[start..].find('}') {
      let var_name = &result[start + 2..start + end];
      let value = std::env::var(var_name).unwrap_or_default();
      result = format!(
        "{}{}{}",
        &result[..start],
        value,
        &result[start + end + 1..]
      );
    } else {
      break;
    }
  }

  let mut i = 0;
  while i < result.len() {
    if result[i..].starts_with('$') && !result[i..].starts_with("${") {
      let rest = &result[i + 1..];
      let var_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        let var_name = &rest[..var_len];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..i], value, &rest[var_len..]);
        i += value.len();
        continue;
      }
    }
    i += 1;
  }

  result
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid config: {0}")]
  Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub redis: RedisConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub limits: LimitsSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default)]
  pub ports: PortsSection,
  /// CORS allowed origins for the ops endpoint; ["*"] is permissive
  #[serde(default = "default_cors_origins")]
  pub cors_origins: Vec<String>,
}

fn default_host() -> String {
  "0.0.0.0".into()
}

fn default_cors_origins() -> Vec<String> {
  vec!["*".to_string()]
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      ports: PortsSection::default(),
      cors_origins: default_cors_origins(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsSection {
  #[serde(default = "default_websocket_port")]
  pub websocket: u16,
  #[serde(default = "default_ops_port")]
  pub ops: u16,
}

fn default_websocket_port() -> u16 {
  8080
}
fn default_ops_port() -> u16 {
  8081
}

impl Default for PortsSection {
  fn default() -> Self {
    Self {
      websocket: default_websocket_port(),
      ops: default_ops_port(),
    }
  }
}

/// Connection and message limits for the real-time gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
  /// Maximum concurrent sockets per IP address (0 = unlimited)
  #[serde(default = "default_max_connections_per_ip")]
  pub max_connections_per_ip: u32,

  /// Sustained client frames per second per connection (0 = unlimited)
  #[serde(default = "default_messages_per_second")]
  pub messages_per_second: u32,

  /// Frames allowed in a burst
  #[serde(default = "default_burst_size")]
  pub burst_size: u32,

  /// Largest accepted client frame in bytes
  #[serde(default = "default_max_message_size")]
  pub max_message_size: usize,
}

fn default_max_connections_per_ip() -> u32 {
  50
}
fn default_messages_per_second() -> u32 {
  20
}
fn default_burst_size() -> u32 {
  40
}
fn default_max_message_size() -> usize {
  64 * 1024
}

impl Default for LimitsSection {
  fn default() -> Self {
    Self {
      max_connections_per_ip: default_max_connections_per_ip(),
      messages_per_second: default_messages_per_second(),
      burst_size: default_burst_size(),
      max_message_size: default_max_message_size(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}
fn default_level() -> String {
  "info".into()
}
impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_yaml(&content)
  }

  /// Parse YAML after `$VAR` / `${VAR}` expansion
  pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, ConfigError> {
    Self::find_in(Path::new("."))
  }

  pub fn find_in(dir: &Path) -> Result<Option<Self>, ConfigError> {
    for name in ["taskhub.yaml", "taskhub.yml"] {
      let p = dir.join(name);
      if p.exists() {
        tracing::info!(path = %p.display(), "loading config");
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn websocket_address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.ports.websocket)
  }

  pub fn ops_address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.ports.ops)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expand_env_vars() {
    std::env::set_var("TASKHUB_CFG_TEST_HOST", "redis.internal");
    assert_eq!(
      expand_env_vars("host: ${TASKHUB_CFG_TEST_HOST}"),
      "host: redis.internal"
    );
    assert_eq!(
      expand_env_vars("host: $TASKHUB_CFG_TEST_HOST:6379"),
      "host: redis.internal:6379"
    );
    assert_eq!(expand_env_vars("cost: $"), "cost: $");
  }

  #[test]
  fn test_defaults() {
    let config = ServerConfig::default();
    assert_eq!(config.websocket_address(), "0.0.0.0:8080");
    assert_eq!(config.ops_address(), "0.0.0.0:8081");
    assert_eq!(config.server.cors_origins, vec!["*"]);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.limits.max_connections_per_ip, 50);
  }
}
