//! Rooms and the real-time wire vocabulary

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Room kind, the part of a room id before the colon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
  User,
  Task,
  Conversation,
}

impl RoomKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      RoomKind::User => "user",
      RoomKind::Task => "task",
      RoomKind::Conversation => "conversation",
    }
  }
}

impl std::str::FromStr for RoomKind {
  type Err = RoomParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "user" => Ok(RoomKind::User),
      "task" => Ok(RoomKind::Task),
      "conversation" => Ok(RoomKind::Conversation),
      other => Err(RoomParseError::UnknownKind(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomParseError {
  #[error("room id must look like kind:id")]
  Malformed,
  #[error("unknown room kind: {0}")]
  UnknownKind(String),
  #[error("room id has an empty entity id")]
  EmptyId,
}

/// A broadcast group, `{kind}:{entity_id}`. Exists only as the set of
/// sessions currently joined to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId {
  kind: RoomKind,
  entity_id: String,
}

impl RoomId {
  pub fn new(kind: RoomKind, entity_id: impl Into<String>) -> Self {
    Self {
      kind,
      entity_id: entity_id.into(),
    }
  }

  pub fn user(id: impl Into<String>) -> Self {
    Self::new(RoomKind::User, id)
  }

  pub fn task(id: impl Into<String>) -> Self {
    Self::new(RoomKind::Task, id)
  }

  pub fn conversation(id: impl Into<String>) -> Self {
    Self::new(RoomKind::Conversation, id)
  }

  pub fn kind(&self) -> RoomKind {
    self.kind
  }

  pub fn entity_id(&self) -> &str {
    &self.entity_id
  }
}

impl std::fmt::Display for RoomId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.kind.as_str(), self.entity_id)
  }
}

impl std::str::FromStr for RoomId {
  type Err = RoomParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, id) = s.split_once(':').ok_or(RoomParseError::Malformed)?;
    if id.is_empty() {
      return Err(RoomParseError::EmptyId);
    }
    Ok(Self::new(kind.parse()?, id))
  }
}

impl TryFrom<String> for RoomId {
  type Error = RoomParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<RoomId> for String {
  fn from(room: RoomId) -> Self {
    room.to_string()
  }
}

/// Canonical domain events. Payloads are the domain objects as JSON; the
/// real-time layer never looks inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
  #[serde(rename = "task:created")]
  TaskCreated(Value),
  #[serde(rename = "task:updated")]
  TaskUpdated(Value),
  #[serde(rename = "task:status_changed")]
  TaskStatusChanged(Value),
  #[serde(rename = "task:deleted")]
  TaskDeleted(Value),
  #[serde(rename = "bid:created")]
  BidCreated(Value),
  #[serde(rename = "bid:updated")]
  BidUpdated(Value),
  #[serde(rename = "bid:accepted")]
  BidAccepted(Value),
  #[serde(rename = "bid:rejected")]
  BidRejected(Value),
  #[serde(rename = "bid:withdrawn")]
  BidWithdrawn(Value),
  #[serde(rename = "notification:new")]
  NotificationNew(Value),
  #[serde(rename = "notification:read")]
  NotificationRead(Value),
  #[serde(rename = "notification:delete")]
  NotificationDelete(Value),
}

impl DomainEvent {
  pub fn event_type(&self) -> &'static str {
    match self {
      DomainEvent::TaskCreated(_) => "task:created",
      DomainEvent::TaskUpdated(_) => "task:updated",
      DomainEvent::TaskStatusChanged(_) => "task:status_changed",
      DomainEvent::TaskDeleted(_) => "task:deleted",
      DomainEvent::BidCreated(_) => "bid:created",
      DomainEvent::BidUpdated(_) => "bid:updated",
      DomainEvent::BidAccepted(_) => "bid:accepted",
      DomainEvent::BidRejected(_) => "bid:rejected",
      DomainEvent::BidWithdrawn(_) => "bid:withdrawn",
      DomainEvent::NotificationNew(_) => "notification:new",
      DomainEvent::NotificationRead(_) => "notification:read",
      DomainEvent::NotificationDelete(_) => "notification:delete",
    }
  }

  pub fn payload(&self) -> &Value {
    match self {
      DomainEvent::TaskCreated(v)
      | DomainEvent::TaskUpdated(v)
      | DomainEvent::TaskStatusChanged(v)
      | DomainEvent::TaskDeleted(v)
      | DomainEvent::BidCreated(v)
      | DomainEvent::BidUpdated(v)
      | DomainEvent::BidAccepted(v)
      | DomainEvent::BidRejected(v)
      | DomainEvent::BidWithdrawn(v)
      | DomainEvent::NotificationNew(v)
      | DomainEvent::NotificationRead(v)
      | DomainEvent::NotificationDelete(v) => v,
    }
  }
}

/// Session-level messages produced by the gateway itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
  Connected {
    connection_id: Uuid,
    user_id: String,
    rooms: Vec<RoomId>,
  },
  AuthenticationError {
    message: String,
  },
  Joined {
    room: RoomId,
  },
  Left {
    room: RoomId,
  },
  Pong,
  Error {
    message: String,
  },
}

/// Everything pushed down a session's channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
  Event(DomainEvent),
  Control(ControlMessage),
}

impl ServerMessage {
  pub fn kind(&self) -> &'static str {
    match self {
      ServerMessage::Event(event) => event.event_type(),
      ServerMessage::Control(ControlMessage::Connected { .. }) => "connected",
      ServerMessage::Control(ControlMessage::AuthenticationError { .. }) => {
        "authentication_error"
      }
      ServerMessage::Control(ControlMessage::Joined { .. }) => "joined",
      ServerMessage::Control(ControlMessage::Left { .. }) => "left",
      ServerMessage::Control(ControlMessage::Pong) => "pong",
      ServerMessage::Control(ControlMessage::Error { .. }) => "error",
    }
  }
}

impl From<DomainEvent> for ServerMessage {
  fn from(event: DomainEvent) -> Self {
    ServerMessage::Event(event)
  }
}

impl From<ControlMessage> for ServerMessage {
  fn from(message: ControlMessage) -> Self {
    ServerMessage::Control(message)
  }
}

/// Frames a client may send after the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
  JoinRoom { room: RoomId },
  LeaveRoom { room: RoomId },
  Ping,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_room_id_parse_and_display() {
    let room: RoomId = "task:42".parse().unwrap();
    assert_eq!(room, RoomId::task("42"));
    assert_eq!(room.to_string(), "task:42");

    // entity ids may themselves contain colons
    let room: RoomId = "conversation:a:b".parse().unwrap();
    assert_eq!(room.entity_id(), "a:b");

    assert_eq!("task".parse::<RoomId>(), Err(RoomParseError::Malformed));
    assert_eq!("user:".parse::<RoomId>(), Err(RoomParseError::EmptyId));
    assert!(matches!(
      "team:1".parse::<RoomId>(),
      Err(RoomParseError::UnknownKind(_))
    ));
  }

  #[test]
  fn test_domain_event_wire_format() {
    let event = DomainEvent::BidAccepted(json!({"bidId": "b1"}));
    let wire = serde_json::to_value(ServerMessage::from(event.clone())).unwrap();
    assert_eq!(wire, json!({"type": "bid:accepted", "data": {"bidId": "b1"}}));
    assert_eq!(event.event_type(), "bid:accepted");
  }

  #[test]
  fn test_authentication_error_wire_format() {
    let msg = ServerMessage::from(ControlMessage::AuthenticationError {
      message: "missing token".into(),
    });
    let wire = serde_json::to_value(&msg).unwrap();
    assert_eq!(wire["type"], "authentication_error");
    assert_eq!(wire["data"]["message"], "missing token");
    assert_eq!(msg.kind(), "authentication_error");
  }

  #[test]
  fn test_client_message_parse() {
    let msg: ClientMessage =
      serde_json::from_str(r#"{"type":"join_room","room":"task:7"}"#).unwrap();
    assert_eq!(
      msg,
      ClientMessage::JoinRoom {
        room: RoomId::task("7")
      }
    );
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"join_room","room":"bad"}"#).is_err());
  }
}
