use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{OpsServer, RateLimiter, ServerConfig};
use crate::realtime::{Authenticator, RealtimeGateway, StaticTokenAuthenticator};
use crate::services::Services;

pub struct Daemon {
  config: ServerConfig,
  services: Arc<Services>,
  authenticator: Arc<dyn Authenticator>,
  rate_limiter: Arc<RateLimiter>,
  shutdown_tx: broadcast::Sender<()>,
  shutdown_requested: AtomicBool,
}

impl Daemon {
  pub fn new(config: ServerConfig) -> Self {
    let authenticator = Arc::new(StaticTokenAuthenticator::from_config(&config.auth));
    if authenticator.is_empty() {
      tracing::warn!("no auth tokens configured, every real-time handshake will be rejected");
    }
    Self::with_authenticator(config, authenticator)
  }

  /// Daemon with an externally supplied credential check
  pub fn with_authenticator(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    let services = Arc::new(Services::new(&config));

    let rate_limiter = Arc::new(RateLimiter::new(config.limits.clone()));
    tracing::info!(
      max_connections_per_ip = config.limits.max_connections_per_ip,
      messages_per_second = config.limits.messages_per_second,
      burst_size = config.limits.burst_size,
      "rate limiter created"
    );

    Self {
      config,
      services,
      authenticator,
      rate_limiter,
      shutdown_tx,
      shutdown_requested: AtomicBool::new(false),
    }
  }

  pub fn services(&self) -> &Arc<Services> {
    &self.services
  }

  /// Trigger graceful shutdown of all servers
  pub fn shutdown(&self) {
    tracing::info!("initiating graceful shutdown");
    self.shutdown_requested.store(true, Ordering::SeqCst);
    let _ = self.shutdown_tx.send(());
  }

  /// Serve until shutdown. Listeners come up immediately; Redis connects in
  /// the background and the cache stays local until it is ready.
  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let ops_shutdown = self.shutdown_tx.subscribe();
    let gateway_shutdown = self.shutdown_tx.subscribe();

    // A signal that arrived before anyone subscribed
    if self.shutdown_requested.load(Ordering::SeqCst) {
      self.services.shutdown().await;
      return Ok(());
    }

    if let Some(redis) = self.services.redis() {
      let mut states = redis.subscribe_state();
      let mut shutdown_rx = self.shutdown_tx.subscribe();
      tokio::spawn(async move {
        loop {
          tokio::select! {
            changed = states.changed() => {
              if changed.is_err() {
                break;
              }
              let state = *states.borrow_and_update();
              tracing::info!(state = %state, "redis connection state changed");
            }
            _ = shutdown_rx.recv() => break,
          }
        }
      });
    }

    let services = self.services.clone();
    tokio::spawn(async move {
      services.init().await;
    });

    let ops = OpsServer::new(self.services.clone(), self.config.clone(), ops_shutdown);
    let ops_addr = self.config.ops_address();
    tokio::spawn(async move {
      if let Err(e) = ops.run(&ops_addr).await {
        tracing::error!(error = %e, "ops endpoint error");
      }
    });

    let gateway = RealtimeGateway::new(
      self.services.registry.clone(),
      self.authenticator.clone(),
      self.rate_limiter.clone(),
      self.config.auth.handshake_timeout(),
      gateway_shutdown,
    );
    let result = gateway.run(&self.config.websocket_address()).await;

    self.services.shutdown().await;
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ConnectionState;
  use std::time::Duration;

  async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
  }

  async fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.ports.websocket = free_port().await;
    config.server.ports.ops = free_port().await;
    config
  }

  #[tokio::test]
  async fn test_listeners_do_not_wait_for_redis() {
    let mut config = test_config().await;
    config.redis.host = "127.0.0.1".into();
    config.redis.port = 1;
    config.redis.url = None;
    config.redis.max_retries = 100;
    config.redis.base_delay_ms = 1_000;
    config.redis.max_delay_ms = 1_000;
    let ws_addr = config.websocket_address();

    let daemon = Arc::new(Daemon::new(config));
    let runner = daemon.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let connected = tokio::time::timeout(Duration::from_secs(2), async {
      loop {
        if tokio::net::TcpStream::connect(&ws_addr).await.is_ok() {
          break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
      }
    })
    .await;
    assert!(connected.is_ok(), "gateway not listening while redis retries");
    assert!(!daemon.services().cache.is_remote_healthy());

    daemon.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
    let redis = daemon.services().redis().unwrap();
    assert_eq!(redis.state(), ConnectionState::Closed);
  }

  #[tokio::test]
  async fn test_shutdown_before_run_is_not_lost() {
    let mut config = test_config().await;
    config.redis.enabled = false;
    let daemon = Daemon::new(config);

    daemon.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(2), daemon.run()).await;
    assert!(matches!(result, Ok(Ok(()))));
  }
}
