//! Operational HTTP endpoint: liveness and cache statistics.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use super::ServerConfig;
use crate::cache::{CacheStats, ConnectionState};
use crate::services::Services;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHealth {
  pub configured: bool,
  pub healthy: bool,
  pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
  /// "ok", or "degraded" while serving from the local cache
  pub status: &'static str,
  pub remote: RemoteHealth,
  pub connections: usize,
  pub connected_users: usize,
  pub rooms: usize,
}

pub async fn health(State(services): State<Arc<Services>>) -> Json<HealthReport> {
  let redis = services.redis();
  let healthy = services.cache.is_remote_healthy();
  let state = redis.map(|r| r.state());
  let status = match state {
    Some(ConnectionState::Ready) | None => "ok",
    Some(_) => "degraded",
  };

  Json(HealthReport {
    status,
    remote: RemoteHealth {
      configured: redis.is_some(),
      healthy,
      state: state.map(|s| s.to_string()),
    },
    connections: services.registry.connection_count(),
    connected_users: services.registry.connected_users_count(),
    rooms: services.registry.room_count(),
  })
}

pub async fn cache_stats(State(services): State<Arc<Services>>) -> Json<CacheStats> {
  Json(services.cache.stats().await)
}

pub fn router(services: Arc<Services>, cors_origins: &[String]) -> Router {
  let cors = if cors_origins.is_empty() || cors_origins.iter().any(|o| o == "*") {
    CorsLayer::permissive()
  } else {
    let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
      .allow_origin(origins)
      .allow_methods(Any)
      .allow_headers(Any)
  };

  Router::new()
    .route("/health", get(health))
    .route("/cache/stats", get(cache_stats))
    .layer(cors)
    .with_state(services)
}

pub struct OpsServer {
  services: Arc<Services>,
  config: ServerConfig,
  shutdown_rx: broadcast::Receiver<()>,
}

impl OpsServer {
  pub fn new(
    services: Arc<Services>,
    config: ServerConfig,
    shutdown_rx: broadcast::Receiver<()>,
  ) -> Self {
    Self {
      services,
      config,
      shutdown_rx,
    }
  }

  pub async fn run(mut self, addr: &str) -> Result<(), anyhow::Error> {
    let app = router(self.services.clone(), &self.config.server.cors_origins);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "ops endpoint listening");

    axum::serve(listener, app.into_make_service())
      .with_graceful_shutdown(async move {
        let _ = self.shutdown_rx.recv().await;
        tracing::info!("ops endpoint shutting down");
      })
      .await?;
    Ok(())
  }
}
