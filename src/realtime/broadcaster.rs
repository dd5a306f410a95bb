use std::collections::HashSet;
use std::sync::Arc;

use super::events::{DomainEvent, RoomId, ServerMessage};
use super::registry::{ConnectionId, ConnectionRegistry, SessionSender};

/// Where an event should go
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
  /// Every session of one user
  User(String),
  /// Every session joined to a room
  Room(RoomId),
  /// Every live session
  All,
}

/// Pushes events to live sessions resolved through the registry.
///
/// Each session gets its own copy on its own queue; a closed queue is
/// logged and skipped without affecting the others. Sends never block.
pub struct EventBroadcaster {
  registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
  pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
    Self { registry }
  }

  pub fn registry(&self) -> &Arc<ConnectionRegistry> {
    &self.registry
  }

  /// Returns the number of sessions the event was queued for
  pub fn emit_to_user(&self, user_id: &str, event: DomainEvent) -> usize {
    let targets = self.registry.user_senders(user_id);
    self.deliver(event, targets)
  }

  pub fn emit_to_room(&self, room: &RoomId, event: DomainEvent) -> usize {
    let targets = self.registry.room_senders(room);
    self.deliver(event, targets)
  }

  pub fn broadcast(&self, event: DomainEvent) -> usize {
    let targets = self.registry.all_senders();
    self.deliver(event, targets)
  }

  pub fn emit(&self, target: &EventTarget, event: DomainEvent) -> usize {
    match target {
      EventTarget::User(user_id) => self.emit_to_user(user_id, event),
      EventTarget::Room(room) => self.emit_to_room(room, event),
      EventTarget::All => self.broadcast(event),
    }
  }

  /// Emit to the union of several targets; a session reached through more
  /// than one target still receives the event once.
  pub fn emit_to_targets(&self, targets: &[EventTarget], event: DomainEvent) -> usize {
    if targets.contains(&EventTarget::All) {
      return self.broadcast(event);
    }

    let mut seen: HashSet<ConnectionId> = HashSet::new();
    let mut recipients = Vec::new();
    for target in targets {
      let senders = match target {
        EventTarget::User(user_id) => self.registry.user_senders(user_id),
        EventTarget::Room(room) => self.registry.room_senders(room),
        EventTarget::All => continue,
      };
      recipients.extend(senders.into_iter().filter(|(id, _)| seen.insert(*id)));
    }
    self.deliver(event, recipients)
  }

  /// Send a message to one specific session
  pub fn send_to_connection(&self, id: ConnectionId, message: ServerMessage) -> bool {
    match self.registry.sender(id) {
      Some(tx) => tx.send(Arc::new(message)).is_ok(),
      None => false,
    }
  }

  fn deliver(&self, event: DomainEvent, targets: Vec<(ConnectionId, SessionSender)>) -> usize {
    let event_type = event.event_type();
    let message = Arc::new(ServerMessage::Event(event));
    let mut delivered = 0;

    for (connection_id, tx) in targets {
      if tx.send(Arc::clone(&message)).is_ok() {
        delivered += 1;
      } else {
        tracing::warn!(
          connection_id = %connection_id,
          event_type,
          "session queue closed, event dropped for this session"
        );
      }
    }

    tracing::debug!(event_type, delivered, "event emitted");
    delivered
  }
}
