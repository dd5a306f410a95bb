//! Connection and message limits for the real-time gateway.
//!
//! Provides:
//! - Connection limits per IP address
//! - Per-connection frame rate limiting using a token bucket

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::config::LimitsSection;
use crate::realtime::ConnectionId;

/// Rate limiter for managing connections and frame rates.
pub struct RateLimiter {
  config: LimitsSection,
  /// Connections per IP: IP -> count
  connections: RwLock<HashMap<IpAddr, u32>>,
}

/// Token bucket for rate limiting.
struct TokenBucket {
  tokens: f64,
  last_update: Instant,
  rate: f64,     // tokens per second
  capacity: f64, // max tokens (burst size)
}

impl TokenBucket {
  fn new(rate: u32, capacity: u32) -> Self {
    Self {
      tokens: capacity as f64,
      last_update: Instant::now(),
      rate: rate as f64,
      capacity: capacity as f64,
    }
  }

  /// Try to consume a token. Returns true if successful.
  fn try_consume(&mut self) -> bool {
    self.refill();
    if self.tokens >= 1.0 {
      self.tokens -= 1.0;
      true
    } else {
      false
    }
  }

  fn refill(&mut self) {
    let now = Instant::now();
    let elapsed = now.duration_since(self.last_update).as_secs_f64();
    self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
    self.last_update = now;
  }

  fn retry_after(&self) -> Duration {
    Duration::from_secs_f64(1.0 / self.rate)
  }
}

/// Frame budget owned by one live connection; dropped with it
pub struct MessageBudget {
  connection_id: ConnectionId,
  bucket: Option<Mutex<TokenBucket>>,
}

impl MessageBudget {
  pub fn check(&self) -> Result<(), RateLimitError> {
    let Some(bucket) = &self.bucket else {
      return Ok(()); // Unlimited
    };
    let mut bucket = bucket.lock();
    if bucket.try_consume() {
      Ok(())
    } else {
      Err(RateLimitError::RateLimited {
        connection_id: self.connection_id,
        retry_after: bucket.retry_after(),
      })
    }
  }
}

impl RateLimiter {
  pub fn new(config: LimitsSection) -> Self {
    Self {
      config,
      connections: RwLock::new(HashMap::new()),
    }
  }

  /// Check if a new connection from this IP is allowed.
  /// If allowed, increments the connection count.
  pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
    if self.config.max_connections_per_ip == 0 {
      return Ok(()); // Unlimited
    }

    let mut conns = self.connections.write();
    let count = conns.entry(ip).or_insert(0);

    if *count >= self.config.max_connections_per_ip {
      return Err(RateLimitError::TooManyConnections {
        ip,
        limit: self.config.max_connections_per_ip,
      });
    }

    *count += 1;
    Ok(())
  }

  /// Release a connection slot for an IP.
  pub fn release_connection(&self, ip: IpAddr) {
    if self.config.max_connections_per_ip == 0 {
      return;
    }
    let mut conns = self.connections.write();
    if let Some(count) = conns.get_mut(&ip) {
      *count = count.saturating_sub(1);
      if *count == 0 {
        conns.remove(&ip);
      }
    }
  }

  pub fn connections_from(&self, ip: IpAddr) -> u32 {
    self.connections.read().get(&ip).copied().unwrap_or(0)
  }

  /// A fresh frame budget for a newly registered connection
  pub fn message_budget(&self, connection_id: ConnectionId) -> MessageBudget {
    let bucket = (self.config.messages_per_second > 0).then(|| {
      Mutex::new(TokenBucket::new(
        self.config.messages_per_second,
        self.config.burst_size.max(1),
      ))
    });
    MessageBudget {
      connection_id,
      bucket,
    }
  }

  pub fn max_message_size(&self) -> usize {
    self.config.max_message_size
  }
}

/// Rate limit errors.
#[derive(Debug, Clone)]
pub enum RateLimitError {
  TooManyConnections {
    ip: IpAddr,
    limit: u32,
  },
  RateLimited {
    connection_id: ConnectionId,
    retry_after: Duration,
  },
}

impl std::fmt::Display for RateLimitError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::TooManyConnections { ip, limit } => {
        write!(
          f,
          "Too many connections from {}: limit is {} per IP",
          ip, limit
        )
      }
      Self::RateLimited { retry_after, .. } => {
        write!(f, "Rate limited, retry after {:?}", retry_after)
      }
    }
  }
}

impl std::error::Error for RateLimitError {}
