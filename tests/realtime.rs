//! Real-time tests: room delivery, fan-out and the WebSocket gateway

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taskhub::realtime::{
  ConnectionRegistry, DomainEvent, EventBroadcaster, Identity, RealtimeGateway, RoomId,
  ServerMessage, StaticTokenAuthenticator,
};
use taskhub::server::{LimitsSection, RateLimiter};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

fn setup() -> (Arc<ConnectionRegistry>, EventBroadcaster) {
  let registry = Arc::new(ConnectionRegistry::new());
  let broadcaster = EventBroadcaster::new(registry.clone());
  (registry, broadcaster)
}

// =============================================================================
// Room delivery
// =============================================================================

#[test]
fn test_room_delivery_stops_after_leave() {
  let (registry, broadcaster) = setup();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let session = registry.register(&Identity::new("u1"), tx);
  let room = RoomId::task("42");
  registry.join_room(session.connection_id, &room);

  let event = DomainEvent::BidCreated(json!({"taskId": "42"}));
  assert_eq!(broadcaster.emit_to_room(&room, event.clone()), 1);
  let received = rx.try_recv().unwrap();
  assert_eq!(*received, ServerMessage::Event(event.clone()));

  registry.leave_room(session.connection_id, &room);
  assert_eq!(broadcaster.emit_to_room(&room, event), 0);
  assert!(rx.try_recv().is_err());
}

#[test]
fn test_room_delivery_stops_after_disconnect() {
  let (registry, broadcaster) = setup();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let session = registry.register(&Identity::new("u1"), tx);
  let room = RoomId::task("42");
  registry.join_room(session.connection_id, &room);
  registry.disconnect(session.connection_id);

  assert_eq!(broadcaster.emit_to_room(&room, DomainEvent::TaskUpdated(json!({}))), 0);
  assert_eq!(broadcaster.emit_to_user("u1", DomainEvent::TaskUpdated(json!({}))), 0);
  assert!(rx.try_recv().is_err());
}

#[test]
fn test_room_order_is_emission_order() {
  let (registry, broadcaster) = setup();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let session = registry.register(&Identity::new("u1"), tx);
  let room = RoomId::conversation("c1");
  registry.join_room(session.connection_id, &room);

  for i in 0..10 {
    broadcaster.emit_to_room(&room, DomainEvent::NotificationNew(json!({ "seq": i })));
  }
  for i in 0..10 {
    let msg = rx.try_recv().unwrap();
    match msg.as_ref() {
      ServerMessage::Event(event) => assert_eq!(event.payload()["seq"], i),
      other => panic!("unexpected message {:?}", other),
    }
  }
}

// =============================================================================
// Fan-out
// =============================================================================

#[test]
fn test_multi_session_fan_out() {
  let (registry, broadcaster) = setup();
  let (tx_phone, mut rx_phone) = mpsc::unbounded_channel();
  let (tx_laptop, mut rx_laptop) = mpsc::unbounded_channel();
  let (tx_other, mut rx_other) = mpsc::unbounded_channel();
  registry.register(&Identity::new("u1"), tx_phone);
  registry.register(&Identity::new("u1"), tx_laptop);
  registry.register(&Identity::new("u2"), tx_other);

  let delivered = broadcaster.emit_to_user("u1", DomainEvent::BidAccepted(json!({"bidId": "b1"})));
  assert_eq!(delivered, 2);

  assert!(rx_phone.try_recv().is_ok());
  assert!(rx_phone.try_recv().is_err());
  assert!(rx_laptop.try_recv().is_ok());
  assert!(rx_laptop.try_recv().is_err());
  assert!(rx_other.try_recv().is_err());
}

#[test]
fn test_broadcast_reaches_everyone() {
  let (registry, broadcaster) = setup();
  let mut receivers = Vec::new();
  for user in ["u1", "u2", "u3"] {
    let (tx, rx) = mpsc::unbounded_channel();
    registry.register(&Identity::new(user), tx);
    receivers.push(rx);
  }

  assert_eq!(broadcaster.broadcast(DomainEvent::TaskCreated(json!({"id": 1}))), 3);
  for rx in &mut receivers {
    assert!(rx.try_recv().is_ok());
  }
  assert_eq!(registry.connected_users_count(), 3);
  assert!(registry.is_user_online("u2"));
  assert!(!registry.is_user_online("u4"));
}

// =============================================================================
// Gateway
// =============================================================================

async fn start_gateway() -> (String, Arc<ConnectionRegistry>, broadcast::Sender<()>) {
  let registry = Arc::new(ConnectionRegistry::new());
  let mut identity = Identity::new("u1");
  identity.rooms = vec![RoomId::task("9")];
  let auth = StaticTokenAuthenticator::new().with_token("good-token", identity);
  let limiter = Arc::new(RateLimiter::new(LimitsSection::default()));
  let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let gateway = RealtimeGateway::new(
    registry.clone(),
    Arc::new(auth),
    limiter,
    Duration::from_secs(5),
    shutdown_rx,
  );
  tokio::spawn(gateway.serve(listener));

  (format!("ws://{}", addr), registry, shutdown_tx)
}

async fn next_json<S>(ws: &mut S) -> Value
where
  S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
  loop {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
      .await
      .expect("timed out waiting for a frame")
      .expect("stream ended")
      .expect("socket error");
    if let Message::Text(text) = frame {
      return serde_json::from_str(text.as_str()).unwrap();
    }
  }
}

#[tokio::test]
async fn test_gateway_rejects_missing_token() {
  let (url, registry, _shutdown) = start_gateway().await;
  let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

  let msg = next_json(&mut ws).await;
  assert_eq!(msg["type"], "authentication_error");
  assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn test_gateway_rejects_bad_token() {
  let (url, registry, _shutdown) = start_gateway().await;
  let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/?token=wrong", url))
    .await
    .unwrap();

  let msg = next_json(&mut ws).await;
  assert_eq!(msg["type"], "authentication_error");
  assert_eq!(msg["data"]["message"], "invalid authentication token");
  assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn test_gateway_session_lifecycle() {
  let (url, registry, _shutdown) = start_gateway().await;
  let broadcaster = EventBroadcaster::new(registry.clone());
  let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/?token=good-token", url))
    .await
    .unwrap();

  let connected = next_json(&mut ws).await;
  assert_eq!(connected["type"], "connected");
  assert_eq!(connected["data"]["user_id"], "u1");
  assert_eq!(connected["data"]["rooms"], json!(["user:u1", "task:9"]));
  assert!(registry.is_user_online("u1"));

  ws.send(Message::Text(r#"{"type":"join_room","room":"task:42"}"#.to_string().into()))
    .await
    .unwrap();
  let joined = next_json(&mut ws).await;
  assert_eq!(joined["type"], "joined");
  assert_eq!(joined["data"]["room"], "task:42");

  broadcaster.emit_to_room(&RoomId::task("42"), DomainEvent::BidCreated(json!({"bidId": "b7"})));
  let event = next_json(&mut ws).await;
  assert_eq!(event, json!({"type": "bid:created", "data": {"bidId": "b7"}}));

  ws.send(Message::Text(r#"{"type":"ping"}"#.to_string().into()))
    .await
    .unwrap();
  assert_eq!(next_json(&mut ws).await["type"], "pong");

  ws.close(None).await.unwrap();
  for _ in 0..50 {
    if !registry.is_user_online("u1") {
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert!(!registry.is_user_online("u1"));
  assert_eq!(registry.room_count(), 0);
}
