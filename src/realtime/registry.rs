use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::auth::Identity;
use super::events::{RoomId, ServerMessage};

pub type ConnectionId = Uuid;

/// Outbound queue of a single live connection
pub type SessionSender = mpsc::UnboundedSender<Arc<ServerMessage>>;

/// One authenticated real-time connection
#[derive(Debug, Clone)]
pub struct ConnectionSession {
  pub connection_id: ConnectionId,
  pub user_id: String,
  pub roles: Vec<String>,
  pub joined_rooms: HashSet<RoomId>,
  pub connected_at: DateTime<Utc>,
}

struct SessionSlot {
  session: ConnectionSession,
  tx: SessionSender,
}

#[derive(Default)]
struct RegistryState {
  sessions: HashMap<ConnectionId, SessionSlot>,
  /// Room -> joined connections
  rooms: HashMap<RoomId, HashSet<ConnectionId>>,
  /// User -> that user's connections (one per device)
  users: HashMap<String, HashSet<ConnectionId>>,
}

impl RegistryState {
  fn join(&mut self, id: ConnectionId, room: &RoomId) -> bool {
    let Some(slot) = self.sessions.get_mut(&id) else {
      return false;
    };
    slot.session.joined_rooms.insert(room.clone());
    self.rooms.entry(room.clone()).or_default().insert(id);
    true
  }

  fn leave(&mut self, id: ConnectionId, room: &RoomId) -> bool {
    let Some(slot) = self.sessions.get_mut(&id) else {
      return false;
    };
    slot.session.joined_rooms.remove(room);
    if let Some(members) = self.rooms.get_mut(room) {
      members.remove(&id);
      if members.is_empty() {
        self.rooms.remove(room);
      }
    }
    true
  }

  fn remove(&mut self, id: ConnectionId) -> Option<ConnectionSession> {
    let slot = self.sessions.remove(&id)?;
    for room in &slot.session.joined_rooms {
      if let Some(members) = self.rooms.get_mut(room) {
        members.remove(&id);
        if members.is_empty() {
          self.rooms.remove(room);
        }
      }
    }
    if let Some(conns) = self.users.get_mut(&slot.session.user_id) {
      conns.remove(&id);
      if conns.is_empty() {
        self.users.remove(&slot.session.user_id);
      }
    }
    Some(slot.session)
  }

  fn senders<'a>(
    &'a self,
    ids: impl IntoIterator<Item = &'a ConnectionId>,
  ) -> Vec<(ConnectionId, SessionSender)> {
    ids
      .into_iter()
      .filter_map(|id| self.sessions.get(id).map(|slot| (*id, slot.tx.clone())))
      .collect()
  }
}

/// Process-wide table of live sessions, room memberships and per-user
/// session sets. All three indexes sit behind one lock so they never
/// disagree.
pub struct ConnectionRegistry {
  state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
  pub fn new() -> Self {
    Self {
      state: RwLock::new(RegistryState::default()),
    }
  }

  /// Create a session for an authenticated identity and join it to its
  /// `user:{id}` room plus any rooms the identity already participates in.
  pub fn register(&self, identity: &Identity, tx: SessionSender) -> ConnectionSession {
    let connection_id = Uuid::new_v4();
    let mut joined_rooms: HashSet<RoomId> = identity.rooms.iter().cloned().collect();
    joined_rooms.insert(RoomId::user(identity.user_id.clone()));

    let session = ConnectionSession {
      connection_id,
      user_id: identity.user_id.clone(),
      roles: identity.roles.clone(),
      joined_rooms,
      connected_at: Utc::now(),
    };

    {
      let mut state = self.state.write();
      for room in &session.joined_rooms {
        state.rooms.entry(room.clone()).or_default().insert(connection_id);
      }
      state
        .users
        .entry(identity.user_id.clone())
        .or_default()
        .insert(connection_id);
      state.sessions.insert(
        connection_id,
        SessionSlot {
          session: session.clone(),
          tx,
        },
      );
    }

    tracing::debug!(
      connection_id = %connection_id,
      user_id = %identity.user_id,
      rooms = session.joined_rooms.len(),
      "session registered"
    );
    session
  }

  /// Idempotent; false if the session is unknown
  pub fn join_room(&self, id: ConnectionId, room: &RoomId) -> bool {
    self.state.write().join(id, room)
  }

  /// Idempotent; false if the session is unknown
  pub fn leave_room(&self, id: ConnectionId, room: &RoomId) -> bool {
    self.state.write().leave(id, room)
  }

  /// Remove the session from every room and from its user's set.
  /// Returns the removed session, or `None` if it was already gone.
  pub fn disconnect(&self, id: ConnectionId) -> Option<ConnectionSession> {
    let removed = self.state.write().remove(id);
    if let Some(session) = &removed {
      tracing::debug!(
        connection_id = %id,
        user_id = %session.user_id,
        rooms = session.joined_rooms.len(),
        "session removed"
      );
    }
    removed
  }

  /// Drop every session, closing their outbound queues
  pub fn close_all(&self) -> usize {
    let mut state = self.state.write();
    let count = state.sessions.len();
    *state = RegistryState::default();
    count
  }

  pub fn session(&self, id: ConnectionId) -> Option<ConnectionSession> {
    self.state.read().sessions.get(&id).map(|s| s.session.clone())
  }

  pub fn is_user_online(&self, user_id: &str) -> bool {
    self.state.read().users.contains_key(user_id)
  }

  pub fn connected_users_count(&self) -> usize {
    self.state.read().users.len()
  }

  pub fn connection_count(&self) -> usize {
    self.state.read().sessions.len()
  }

  pub fn room_count(&self) -> usize {
    self.state.read().rooms.len()
  }

  pub fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
    self
      .state
      .read()
      .rooms
      .get(room)
      .map(|m| m.iter().copied().collect())
      .unwrap_or_default()
  }

  pub fn user_connections(&self, user_id: &str) -> Vec<ConnectionId> {
    self
      .state
      .read()
      .users
      .get(user_id)
      .map(|c| c.iter().copied().collect())
      .unwrap_or_default()
  }

  pub(crate) fn sender(&self, id: ConnectionId) -> Option<SessionSender> {
    self.state.read().sessions.get(&id).map(|s| s.tx.clone())
  }

  pub(crate) fn room_senders(&self, room: &RoomId) -> Vec<(ConnectionId, SessionSender)> {
    let state = self.state.read();
    match state.rooms.get(room) {
      Some(members) => state.senders(members),
      None => Vec::new(),
    }
  }

  pub(crate) fn user_senders(&self, user_id: &str) -> Vec<(ConnectionId, SessionSender)> {
    let state = self.state.read();
    match state.users.get(user_id) {
      Some(conns) => state.senders(conns),
      None => Vec::new(),
    }
  }

  pub(crate) fn all_senders(&self) -> Vec<(ConnectionId, SessionSender)> {
    let state = self.state.read();
    state.senders(state.sessions.keys())
  }
}

impl Default for ConnectionRegistry {
  fn default() -> Self {
    Self::new()
  }
}
