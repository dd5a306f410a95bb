//! Shared remote store client
//!
//! `RemoteCache` is the seam the façade talks to. `RedisCacheClient` is the
//! production implementation: it owns one multiplexed connection, publishes
//! its connection state on a `watch` channel, and reports healthy only while
//! that state is `Ready`.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::config::RedisConfig;

/// Commands the façade issues against the shared store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
  Get { key: String },
  Set { key: String, value: String, ttl: Duration },
  Del { keys: Vec<String> },
  Keys { pattern: String },
  Exists { key: String },
  Ttl { key: String },
  Expire { key: String, ttl: Duration },
  Info,
  Ping,
}

impl RemoteCommand {
  pub fn name(&self) -> &'static str {
    match self {
      RemoteCommand::Get { .. } => "GET",
      RemoteCommand::Set { .. } => "SET",
      RemoteCommand::Del { .. } => "DEL",
      RemoteCommand::Keys { .. } => "KEYS",
      RemoteCommand::Exists { .. } => "EXISTS",
      RemoteCommand::Ttl { .. } => "TTL",
      RemoteCommand::Expire { .. } => "PEXPIRE",
      RemoteCommand::Info => "INFO",
      RemoteCommand::Ping => "PING",
    }
  }

  fn to_redis(&self) -> redis::Cmd {
    let mut cmd = redis::cmd(self.name());
    match self {
      RemoteCommand::Get { key }
      | RemoteCommand::Exists { key }
      | RemoteCommand::Ttl { key } => {
        cmd.arg(key);
      }
      RemoteCommand::Set { key, value, ttl } => {
        cmd
          .arg(key)
          .arg(value)
          .arg("PX")
          .arg(ttl.as_millis().max(1) as u64);
      }
      RemoteCommand::Del { keys } => {
        cmd.arg(keys);
      }
      RemoteCommand::Keys { pattern } => {
        cmd.arg(pattern);
      }
      RemoteCommand::Expire { key, ttl } => {
        cmd.arg(key).arg(ttl.as_millis().max(1) as u64);
      }
      RemoteCommand::Info => {
        cmd.arg("memory");
      }
      RemoteCommand::Ping => {}
    }
    cmd
  }
}

/// Decoded reply from the shared store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
  Nil,
  Ok,
  Integer(i64),
  Bulk(String),
  Status(String),
  Array(Vec<String>),
}

impl RemoteReply {
  pub fn into_string(self) -> Option<String> {
    match self {
      RemoteReply::Bulk(s) | RemoteReply::Status(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      RemoteReply::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn into_array(self) -> Vec<String> {
    match self {
      RemoteReply::Array(items) => items,
      _ => Vec::new(),
    }
  }

  fn from_redis(value: redis::Value) -> Result<Self, RemoteError> {
    match value {
      redis::Value::Nil => Ok(RemoteReply::Nil),
      redis::Value::Okay => Ok(RemoteReply::Ok),
      redis::Value::Int(i) => Ok(RemoteReply::Integer(i)),
      redis::Value::Boolean(b) => Ok(RemoteReply::Integer(b as i64)),
      redis::Value::BulkString(bytes) => String::from_utf8(bytes)
        .map(RemoteReply::Bulk)
        .map_err(|e| RemoteError::Decode(e.to_string())),
      redis::Value::SimpleString(s) => Ok(RemoteReply::Status(s)),
      redis::Value::VerbatimString { text, .. } => Ok(RemoteReply::Bulk(text)),
      redis::Value::Array(items) | redis::Value::Set(items) => {
        let strings = items
          .into_iter()
          .filter_map(|v| match v {
            redis::Value::BulkString(bytes) => String::from_utf8(bytes).ok(),
            redis::Value::SimpleString(s) => Some(s),
            _ => None,
          })
          .collect();
        Ok(RemoteReply::Array(strings))
      }
      other => Err(RemoteError::Decode(format!("unexpected reply: {:?}", other))),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  #[error("invalid redis configuration: {0}")]
  Config(String),
  #[error("not connected")]
  NotConnected,
  #[error("connect failed: {0}")]
  Connect(String),
  #[error("connect timed out after {0:?}")]
  ConnectTimeout(Duration),
  #[error("{command} timed out after {timeout:?}")]
  CommandTimeout {
    command: &'static str,
    timeout: Duration,
  },
  #[error("{command} failed: {message}")]
  Command {
    command: &'static str,
    message: String,
  },
  #[error("gave up after {attempts} connection attempts")]
  RetriesExhausted { attempts: u32 },
  #[error("undecodable reply: {0}")]
  Decode(String),
}

/// Connection lifecycle as seen by the client itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Idle,
  Connecting,
  Ready,
  Error,
  Reconnecting,
  Closed,
  /// Retries exhausted; stays here until `connect()` is called again
  Failed,
}

impl std::fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConnectionState::Idle => write!(f, "idle"),
      ConnectionState::Connecting => write!(f, "connecting"),
      ConnectionState::Ready => write!(f, "ready"),
      ConnectionState::Error => write!(f, "error"),
      ConnectionState::Reconnecting => write!(f, "reconnecting"),
      ConnectionState::Closed => write!(f, "closed"),
      ConnectionState::Failed => write!(f, "failed"),
    }
  }
}

/// The shared-store seam used by `DualBackendCache`
#[async_trait]
pub trait RemoteCache: Send + Sync {
  /// Last known connection state, not re-verified per call
  fn is_healthy(&self) -> bool;

  async fn execute(&self, command: RemoteCommand) -> Result<RemoteReply, RemoteError>;

  /// Round-trip check, stronger than `is_healthy`
  async fn ping(&self) -> bool {
    self.execute(RemoteCommand::Ping).await.is_ok()
  }
}

struct ClientInner {
  config: RedisConfig,
  client: Client,
  connection: RwLock<Option<MultiplexedConnection>>,
  state_tx: watch::Sender<ConnectionState>,
  consecutive_failures: AtomicU32,
  reconnecting: AtomicBool,
  closed: AtomicBool,
}

/// Redis-backed `RemoteCache`
pub struct RedisCacheClient {
  inner: Arc<ClientInner>,
}

impl RedisCacheClient {
  /// Build the client without connecting
  pub fn new(config: RedisConfig) -> Result<Self, RemoteError> {
    let client =
      Client::open(config.connection_url()).map_err(|e| RemoteError::Config(e.to_string()))?;
    let (state_tx, _) = watch::channel(ConnectionState::Idle);
    Ok(Self {
      inner: Arc::new(ClientInner {
        config,
        client,
        connection: RwLock::new(None),
        state_tx,
        consecutive_failures: AtomicU32::new(0),
        reconnecting: AtomicBool::new(false),
        closed: AtomicBool::new(false),
      }),
    })
  }

  /// Connect with capped exponential backoff. Exhausting the retries leaves
  /// the client in `Failed` until `connect()` is called again.
  pub async fn connect(&self) -> Result<(), RemoteError> {
    self.inner.closed.store(false, Ordering::SeqCst);
    ClientInner::connect_with_backoff(&self.inner, ConnectionState::Connecting).await
  }

  /// Drop the connection. Idempotent.
  pub async fn disconnect(&self) {
    self.inner.closed.store(true, Ordering::SeqCst);
    let had_connection = self.inner.connection.write().take().is_some();
    self.inner.set_state(ConnectionState::Closed);
    if had_connection {
      tracing::info!("Redis connection closed");
    }
  }

  pub fn state(&self) -> ConnectionState {
    *self.inner.state_tx.borrow()
  }

  /// Stream of connection-state transitions
  pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
    self.inner.state_tx.subscribe()
  }

  pub fn consecutive_failures(&self) -> u32 {
    self.inner.consecutive_failures.load(Ordering::Relaxed)
  }
}

impl ClientInner {
  fn state(&self) -> ConnectionState {
    *self.state_tx.borrow()
  }

  fn set_state(&self, state: ConnectionState) {
    self.state_tx.send_if_modified(|current| {
      if *current == state {
        false
      } else {
        tracing::debug!(from = %current, to = %state, "redis connection state");
        *current = state;
        true
      }
    });
  }

  async fn try_connect_once(&self) -> Result<MultiplexedConnection, RemoteError> {
    let timeout = self.config.connect_timeout();
    match tokio::time::timeout(timeout, self.client.get_multiplexed_async_connection()).await {
      Ok(Ok(conn)) => Ok(conn),
      Ok(Err(e)) => Err(RemoteError::Connect(e.to_string())),
      Err(_) => Err(RemoteError::ConnectTimeout(timeout)),
    }
  }

  async fn connect_with_backoff(
    inner: &Arc<ClientInner>,
    attempt_state: ConnectionState,
  ) -> Result<(), RemoteError> {
    let max_attempts = inner.config.max_retries.max(1);

    for attempt in 1..=max_attempts {
      if inner.closed.load(Ordering::SeqCst) {
        return Err(RemoteError::NotConnected);
      }
      inner.set_state(attempt_state);

      let attempt_result = inner.try_connect_once().await;
      // disconnect() won the race; leave its Closed state alone
      if inner.closed.load(Ordering::SeqCst) {
        return Err(RemoteError::NotConnected);
      }
      match attempt_result {
        Ok(conn) => {
          *inner.connection.write() = Some(conn);
          inner.consecutive_failures.store(0, Ordering::Relaxed);
          inner.set_state(ConnectionState::Ready);
          tracing::info!(attempt, "Redis connection ready");
          return Ok(());
        }
        Err(e) => {
          inner.set_state(ConnectionState::Error);
          tracing::warn!(attempt, max_attempts, error = %e, "Redis connection attempt failed");
        }
      }

      if attempt < max_attempts {
        let delay = inner.config.backoff_delay(attempt);
        let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 10);
        tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
      }
    }

    inner.set_state(ConnectionState::Failed);
    tracing::error!(
      attempts = max_attempts,
      "Redis unreachable, giving up; cache is running on the local store"
    );
    Err(RemoteError::RetriesExhausted {
      attempts: max_attempts,
    })
  }

  fn record_success(&self) {
    self.consecutive_failures.store(0, Ordering::Relaxed);
  }

  /// Count a failure; past the threshold drop the connection and start a
  /// background reconnect.
  fn record_failure(inner: &Arc<ClientInner>, error: &RemoteError) {
    let failures = inner.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::debug!(failures, error = %error, "Redis command failed");

    if failures < inner.config.failure_threshold.max(1) || inner.state() != ConnectionState::Ready {
      return;
    }

    tracing::warn!(failures, "Redis marked unhealthy after consecutive failures");
    inner.connection.write().take();
    inner.set_state(ConnectionState::Error);
    Self::spawn_reconnect(inner);
  }

  fn spawn_reconnect(inner: &Arc<ClientInner>) {
    if inner
      .reconnecting
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
      let _ = ClientInner::connect_with_backoff(&inner, ConnectionState::Reconnecting).await;
      inner.reconnecting.store(false, Ordering::SeqCst);
    });
  }

  /// Reuse the live connection or make one bounded attempt within the
  /// connect timeout
  async fn acquire(&self) -> Result<MultiplexedConnection, RemoteError> {
    let existing = self.connection.read().clone();
    if let Some(conn) = existing {
      return Ok(conn);
    }
    if self.closed.load(Ordering::SeqCst)
      || self.reconnecting.load(Ordering::SeqCst)
      || self.state() == ConnectionState::Failed
    {
      return Err(RemoteError::NotConnected);
    }
    let conn = self.try_connect_once().await?;
    *self.connection.write() = Some(conn.clone());
    self.set_state(ConnectionState::Ready);
    Ok(conn)
  }
}

#[async_trait]
impl RemoteCache for RedisCacheClient {
  fn is_healthy(&self) -> bool {
    self.state() == ConnectionState::Ready
  }

  async fn execute(&self, command: RemoteCommand) -> Result<RemoteReply, RemoteError> {
    let inner = &self.inner;
    let mut conn = match inner.acquire().await {
      Ok(conn) => conn,
      Err(e) => {
        ClientInner::record_failure(inner, &e);
        return Err(e);
      }
    };

    let name = command.name();
    let timeout = inner.config.command_timeout();
    let cmd = command.to_redis();
    let result = match tokio::time::timeout(timeout, cmd.query_async::<redis::Value>(&mut conn)).await
    {
      Ok(Ok(value)) => RemoteReply::from_redis(value),
      Ok(Err(e)) => Err(RemoteError::Command {
        command: name,
        message: e.to_string(),
      }),
      Err(_) => Err(RemoteError::CommandTimeout {
        command: name,
        timeout,
      }),
    };

    match &result {
      Ok(_) => inner.record_success(),
      Err(e) => ClientInner::record_failure(inner, e),
    }
    result
  }
}

/// Extract a numeric field from an `INFO` reply
pub fn parse_info_field(info: &str, field: &str) -> Option<u64> {
  info.lines().find_map(|line| {
    line
      .strip_prefix(field)
      .and_then(|rest| rest.strip_prefix(':'))
      .and_then(|val| val.trim().parse().ok())
  })
}
