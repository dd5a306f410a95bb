//! Handshake authentication for real-time sessions.
//!
//! Credential policy lives outside this crate; the gateway only needs
//! something that turns a bearer token into an [`Identity`]. The static
//! token table here covers service-to-service use and local development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::events::RoomId;
use crate::security::{constant_time_compare, hash_sha256};

/// An already-authenticated user, as handed to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub user_id: String,
  pub roles: Vec<String>,
  /// Task or conversation rooms the user already participates in
  pub rooms: Vec<RoomId>,
}

impl Identity {
  pub fn new(user_id: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
      roles: Vec::new(),
      rooms: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
  #[error("authentication token required")]
  MissingCredential,
  #[error("invalid authentication token")]
  InvalidCredential,
  #[error("authentication timed out")]
  Timeout,
  #[error("authentication unavailable: {0}")]
  Unavailable(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
  async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// One configured credential. Either `token` (plaintext, usually pulled in
/// through `${VAR}` expansion) or `token_hash` (hex SHA-256) must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenGrant {
  #[serde(default)]
  pub token: Option<String>,
  #[serde(default)]
  pub token_hash: Option<String>,
  pub user_id: String,
  #[serde(default)]
  pub roles: Vec<String>,
  #[serde(default)]
  pub rooms: Vec<RoomId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
  #[serde(default)]
  pub tokens: Vec<TokenGrant>,
  /// Time allowed between TCP accept and a completed, authenticated handshake
  #[serde(default = "default_handshake_timeout_ms")]
  pub handshake_timeout_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
  10_000
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      tokens: Vec::new(),
      handshake_timeout_ms: default_handshake_timeout_ms(),
    }
  }
}

impl AuthConfig {
  pub fn handshake_timeout(&self) -> Duration {
    Duration::from_millis(self.handshake_timeout_ms)
  }
}

/// Looks tokens up by their SHA-256 hash; plaintext tokens are never kept
pub struct StaticTokenAuthenticator {
  grants: HashMap<String, Identity>,
}

impl StaticTokenAuthenticator {
  pub fn new() -> Self {
    Self {
      grants: HashMap::new(),
    }
  }

  pub fn from_config(config: &AuthConfig) -> Self {
    let mut auth = Self::new();
    for grant in &config.tokens {
      let hash = match (&grant.token, &grant.token_hash) {
        (Some(token), _) if !token.is_empty() => hash_sha256(token),
        (_, Some(hash)) if !hash.is_empty() => hash.to_lowercase(),
        _ => {
          tracing::warn!(user_id = %grant.user_id, "token grant has no token, skipping");
          continue;
        }
      };
      auth.grants.insert(
        hash,
        Identity {
          user_id: grant.user_id.clone(),
          roles: grant.roles.clone(),
          rooms: grant.rooms.clone(),
        },
      );
    }
    tracing::debug!(grants = auth.grants.len(), "static token table loaded");
    auth
  }

  pub fn with_token(mut self, token: &str, identity: Identity) -> Self {
    self.grants.insert(hash_sha256(token), identity);
    self
  }

  pub fn len(&self) -> usize {
    self.grants.len()
  }

  pub fn is_empty(&self) -> bool {
    self.grants.is_empty()
  }
}

impl Default for StaticTokenAuthenticator {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
  async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
    if token.is_empty() {
      return Err(AuthError::MissingCredential);
    }
    let presented = hash_sha256(token);
    // Compare against every entry so lookup time does not depend on the match
    let mut found = None;
    for (hash, identity) in &self.grants {
      if constant_time_compare(hash, &presented) {
        found = Some(identity);
      }
    }
    found.cloned().ok_or(AuthError::InvalidCredential)
  }
}

/// Pull a bearer token out of the handshake request. The `Authorization`
/// header wins; browsers that cannot set headers pass `?token=`.
pub fn bearer_from_request(authorization: Option<&str>, query: Option<&str>) -> Option<String> {
  if let Some(value) = authorization {
    let value = value.trim();
    let token = match value.split_once(' ') {
      Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
      _ if value.eq_ignore_ascii_case("bearer") => "",
      _ => value,
    };
    if !token.is_empty() {
      return Some(token.to_string());
    }
  }

  query?
    .split('&')
    .filter_map(|pair| pair.split_once('='))
    .find(|(name, _)| *name == "token")
    .map(|(_, value)| value.to_string())
    .filter(|value| !value.is_empty())
}
