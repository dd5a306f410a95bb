//! WebSocket front door for real-time sessions.
//!
//! A socket must present a bearer token during the HTTP upgrade. Sockets
//! that fail authentication receive one `authentication_error` message and
//! are closed; there are no anonymous sessions.

use futures_util::{SinkExt, StreamExt};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::auth::{bearer_from_request, AuthError, Authenticator, Identity};
use super::events::{ClientMessage, ControlMessage, RoomKind, ServerMessage};
use super::registry::{ConnectionRegistry, ConnectionSession};
use crate::server::RateLimiter;

pub struct RealtimeGateway {
  registry: Arc<ConnectionRegistry>,
  authenticator: Arc<dyn Authenticator>,
  rate_limiter: Arc<RateLimiter>,
  handshake_timeout: Duration,
  shutdown_rx: broadcast::Receiver<()>,
}

impl RealtimeGateway {
  pub fn new(
    registry: Arc<ConnectionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    rate_limiter: Arc<RateLimiter>,
    handshake_timeout: Duration,
    shutdown_rx: broadcast::Receiver<()>,
  ) -> Self {
    Self {
      registry,
      authenticator,
      rate_limiter,
      handshake_timeout,
      shutdown_rx,
    }
  }

  pub async fn run(self, addr: &str) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr, "real-time gateway listening");
    self.serve(listener).await
  }

  /// Accept sockets on an already-bound listener until shutdown
  pub async fn serve(mut self, listener: TcpListener) -> Result<(), anyhow::Error> {
    loop {
      tokio::select! {
        accepted = listener.accept() => {
          let (stream, peer) = match accepted {
            Ok(a) => a,
            Err(e) => {
              tracing::warn!(error = %e, "accept failed");
              continue;
            }
          };
          let peer_ip = peer.ip();

          if let Err(e) = self.rate_limiter.check_connection(peer_ip) {
            tracing::warn!(peer = %peer_ip, error = %e, "connection rejected");
            continue;
          }

          let ctx = SessionContext {
            registry: self.registry.clone(),
            authenticator: self.authenticator.clone(),
            rate_limiter: self.rate_limiter.clone(),
            handshake_timeout: self.handshake_timeout,
            shutdown_rx: self.shutdown_rx.resubscribe(),
          };
          tokio::spawn(handle_socket(stream, peer_ip, ctx));
        }
        _ = self.shutdown_rx.recv() => break,
      }
    }
    tracing::info!("real-time gateway stopped");
    Ok(())
  }
}

struct SessionContext {
  registry: Arc<ConnectionRegistry>,
  authenticator: Arc<dyn Authenticator>,
  rate_limiter: Arc<RateLimiter>,
  handshake_timeout: Duration,
  shutdown_rx: broadcast::Receiver<()>,
}

enum Handshake {
  Accepted(WebSocketStream<TcpStream>, Identity),
  Rejected(WebSocketStream<TcpStream>, AuthError),
}

async fn handshake(
  stream: TcpStream,
  authenticator: &dyn Authenticator,
) -> Result<Handshake, tokio_tungstenite::tungstenite::Error> {
  let mut bearer = None;
  let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
    let header = req
      .headers()
      .get("authorization")
      .and_then(|v| v.to_str().ok());
    bearer = bearer_from_request(header, req.uri().query());
    Ok::<_, ErrorResponse>(resp)
  })
  .await?;

  let Some(token) = bearer else {
    return Ok(Handshake::Rejected(ws, AuthError::MissingCredential));
  };
  match authenticator.authenticate(&token).await {
    Ok(identity) => Ok(Handshake::Accepted(ws, identity)),
    Err(e) => Ok(Handshake::Rejected(ws, e)),
  }
}

async fn handle_socket(stream: TcpStream, peer_ip: IpAddr, mut ctx: SessionContext) {
  let outcome = tokio::time::timeout(
    ctx.handshake_timeout,
    handshake(stream, ctx.authenticator.as_ref()),
  )
  .await;

  let (ws, identity) = match outcome {
    Ok(Ok(Handshake::Accepted(ws, identity))) => (ws, identity),
    Ok(Ok(Handshake::Rejected(ws, e))) => {
      tracing::info!(peer = %peer_ip, error = %e, "handshake rejected");
      reject(ws, &e).await;
      ctx.rate_limiter.release_connection(peer_ip);
      return;
    }
    Ok(Err(e)) => {
      tracing::debug!(peer = %peer_ip, error = %e, "websocket upgrade failed");
      ctx.rate_limiter.release_connection(peer_ip);
      return;
    }
    Err(_) => {
      tracing::info!(peer = %peer_ip, "handshake timed out");
      ctx.rate_limiter.release_connection(peer_ip);
      return;
    }
  };

  let (mut sink, mut stream) = ws.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ServerMessage>>();
  let session = ctx.registry.register(&identity, tx.clone());
  let connection_id = session.connection_id;
  tracing::info!(
    connection_id = %connection_id,
    user_id = %session.user_id,
    peer = %peer_ip,
    "session opened"
  );

  let mut rooms: Vec<_> = session.joined_rooms.iter().cloned().collect();
  rooms.sort();
  let _ = tx.send(Arc::new(
    ControlMessage::Connected {
      connection_id,
      user_id: session.user_id.clone(),
      rooms,
    }
    .into(),
  ));

  let send_task = tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      let serialized = match serde_json::to_string(msg.as_ref()) {
        Ok(s) => s,
        Err(e) => {
          tracing::error!(kind = msg.kind(), error = %e, "failed to serialize message");
          continue;
        }
      };
      if sink.send(Message::Text(serialized.into())).await.is_err() {
        break;
      }
    }
    let _ = sink.close().await;
  });

  let budget = ctx.rate_limiter.message_budget(connection_id);
  let max_size = ctx.rate_limiter.max_message_size();

  loop {
    let frame = tokio::select! {
      frame = stream.next() => frame,
      _ = ctx.shutdown_rx.recv() => break,
    };
    let text = match frame {
      Some(Ok(Message::Text(text))) => text,
      Some(Ok(Message::Close(_))) | None => break,
      Some(Ok(_)) => continue,
      Some(Err(e)) => {
        tracing::debug!(connection_id = %connection_id, error = %e, "socket read failed");
        break;
      }
    };

    let reply = if let Err(e) = budget.check() {
      tracing::debug!(connection_id = %connection_id, error = %e, "frame rate limited");
      ControlMessage::Error {
        message: e.to_string(),
      }
    } else if max_size > 0 && text.len() > max_size {
      ControlMessage::Error {
        message: format!("message exceeds {} bytes", max_size),
      }
    } else {
      handle_frame(&ctx.registry, &session, text.as_str())
    };

    if tx.send(Arc::new(reply.into())).is_err() {
      break;
    }
  }

  ctx.registry.disconnect(connection_id);
  ctx.rate_limiter.release_connection(peer_ip);
  send_task.abort();
  tracing::info!(connection_id = %connection_id, "session closed");
}

async fn reject(mut ws: WebSocketStream<TcpStream>, error: &AuthError) {
  let msg = ServerMessage::from(ControlMessage::AuthenticationError {
    message: error.to_string(),
  });
  if let Ok(serialized) = serde_json::to_string(&msg) {
    let _ = ws.send(Message::Text(serialized.into())).await;
  }
  let _ = ws.close(None).await;
}

/// Apply one client frame to the session and produce the reply
pub fn handle_frame(
  registry: &ConnectionRegistry,
  session: &ConnectionSession,
  text: &str,
) -> ControlMessage {
  let msg = match serde_json::from_str::<ClientMessage>(text) {
    Ok(m) => m,
    Err(e) => {
      return ControlMessage::Error {
        message: format!("invalid message: {}", e),
      }
    }
  };

  match msg {
    ClientMessage::JoinRoom { room } => {
      if room.kind() == RoomKind::User && room.entity_id() != session.user_id {
        return ControlMessage::Error {
          message: format!("cannot join {}", room),
        };
      }
      if registry.join_room(session.connection_id, &room) {
        tracing::debug!(connection_id = %session.connection_id, room = %room, "joined room");
        ControlMessage::Joined { room }
      } else {
        ControlMessage::Error {
          message: "session closed".into(),
        }
      }
    }
    ClientMessage::LeaveRoom { room } => {
      registry.leave_room(session.connection_id, &room);
      ControlMessage::Left { room }
    }
    ClientMessage::Ping => ControlMessage::Pong,
  }
}
