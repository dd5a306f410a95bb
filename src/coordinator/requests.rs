use serde_json::Value;

use super::keys;
use crate::realtime::{DomainEvent, EventTarget, RoomId};

/// A domain event plus who should receive it
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
  pub event: DomainEvent,
  pub targets: Vec<EventTarget>,
}

/// What a completed mutation invalidates and announces. Built by the
/// write path, consumed once by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationRequest {
  /// Exact keys to drop
  pub keys: Vec<String>,
  /// Prefix patterns, a trailing `*` meaning any suffix
  pub key_patterns: Vec<String>,
  pub event: RoutedEvent,
}

impl InvalidationRequest {
  pub fn new(event: DomainEvent) -> Self {
    Self {
      keys: Vec::new(),
      key_patterns: Vec::new(),
      event: RoutedEvent {
        event,
        targets: Vec::new(),
      },
    }
  }

  pub fn key(mut self, key: impl Into<String>) -> Self {
    self.keys.push(key.into());
    self
  }

  pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
    self.key_patterns.push(pattern.into());
    self
  }

  /// Drop `key` and everything nested below it
  pub fn tree(self, key: String) -> Self {
    let children = keys::children(&key);
    self.key(key).pattern(children)
  }

  pub fn to(mut self, target: EventTarget) -> Self {
    if !self.event.targets.contains(&target) {
      self.event.targets.push(target);
    }
    self
  }

  pub fn to_user(self, user_id: &str) -> Self {
    self.to(EventTarget::User(user_id.to_string()))
  }

  pub fn to_room(self, room: RoomId) -> Self {
    self.to(EventTarget::Room(room))
  }

  pub fn to_all(self) -> Self {
    self.to(EventTarget::All)
  }

  pub fn event_type(&self) -> &'static str {
    self.event.event.event_type()
  }
}

fn task_listings(req: InvalidationRequest) -> InvalidationRequest {
  req
    .pattern(keys::children(&keys::tasks_list()))
    .pattern(keys::children(&keys::tasks_search()))
}

/// A new open task is visible to every tasker
pub fn task_created(task_id: &str, client_id: &str, payload: Value) -> InvalidationRequest {
  let req = InvalidationRequest::new(DomainEvent::TaskCreated(payload))
    .tree(keys::task(task_id))
    .tree(keys::user_tasks(client_id));
  task_listings(req).to_all()
}

pub fn task_updated(task_id: &str, client_id: &str, payload: Value) -> InvalidationRequest {
  let req = InvalidationRequest::new(DomainEvent::TaskUpdated(payload))
    .tree(keys::task(task_id))
    .tree(keys::user_tasks(client_id));
  task_listings(req)
    .to_room(RoomId::task(task_id))
    .to_user(client_id)
}

/// Status moves (open, assigned, completed, cancelled) also matter to the
/// assigned tasker, if any
pub fn task_status_changed(
  task_id: &str,
  client_id: &str,
  assignee_id: Option<&str>,
  payload: Value,
) -> InvalidationRequest {
  let mut req = InvalidationRequest::new(DomainEvent::TaskStatusChanged(payload))
    .tree(keys::task(task_id))
    .tree(keys::user_tasks(client_id));
  req = task_listings(req)
    .to_room(RoomId::task(task_id))
    .to_user(client_id);
  if let Some(assignee) = assignee_id {
    req = req.tree(keys::user_tasks(assignee)).to_user(assignee);
  }
  req
}

pub fn task_deleted(task_id: &str, client_id: &str, payload: Value) -> InvalidationRequest {
  let req = InvalidationRequest::new(DomainEvent::TaskDeleted(payload))
    .tree(keys::task(task_id))
    .tree(keys::task_bids(task_id))
    .tree(keys::user_tasks(client_id));
  task_listings(req)
    .to_room(RoomId::task(task_id))
    .to_user(client_id)
}

pub fn bid_created(
  task_id: &str,
  client_id: &str,
  tasker_id: &str,
  payload: Value,
) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::BidCreated(payload))
    .tree(keys::task(task_id))
    .tree(keys::task_bids(task_id))
    .tree(keys::user_bids(tasker_id))
    .to_room(RoomId::task(task_id))
    .to_user(client_id)
}

pub fn bid_updated(
  bid_id: &str,
  task_id: &str,
  client_id: &str,
  tasker_id: &str,
  payload: Value,
) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::BidUpdated(payload))
    .tree(keys::bid(bid_id))
    .tree(keys::task_bids(task_id))
    .tree(keys::user_bids(tasker_id))
    .to_room(RoomId::task(task_id))
    .to_user(client_id)
}

/// Accepting a bid assigns the task, so task listings go stale too
pub fn bid_accepted(
  bid_id: &str,
  task_id: &str,
  client_id: &str,
  tasker_id: &str,
  payload: Value,
) -> InvalidationRequest {
  let req = InvalidationRequest::new(DomainEvent::BidAccepted(payload))
    .tree(keys::bid(bid_id))
    .tree(keys::task(task_id))
    .tree(keys::task_bids(task_id))
    .tree(keys::user_bids(tasker_id))
    .tree(keys::user_tasks(client_id))
    .tree(keys::user_tasks(tasker_id));
  task_listings(req)
    .to_room(RoomId::task(task_id))
    .to_user(tasker_id)
    .to_user(client_id)
}

pub fn bid_rejected(
  bid_id: &str,
  task_id: &str,
  tasker_id: &str,
  payload: Value,
) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::BidRejected(payload))
    .tree(keys::bid(bid_id))
    .tree(keys::task_bids(task_id))
    .tree(keys::user_bids(tasker_id))
    .to_user(tasker_id)
}

pub fn bid_withdrawn(
  bid_id: &str,
  task_id: &str,
  client_id: &str,
  tasker_id: &str,
  payload: Value,
) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::BidWithdrawn(payload))
    .tree(keys::bid(bid_id))
    .tree(keys::task(task_id))
    .tree(keys::task_bids(task_id))
    .tree(keys::user_bids(tasker_id))
    .to_room(RoomId::task(task_id))
    .to_user(client_id)
}

pub fn notification_new(user_id: &str, payload: Value) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::NotificationNew(payload))
    .tree(keys::user_notifications(user_id))
    .to_user(user_id)
}

pub fn notification_read(user_id: &str, payload: Value) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::NotificationRead(payload))
    .tree(keys::user_notifications(user_id))
    .to_user(user_id)
}

pub fn notification_deleted(user_id: &str, payload: Value) -> InvalidationRequest {
  InvalidationRequest::new(DomainEvent::NotificationDelete(payload))
    .tree(keys::user_notifications(user_id))
    .to_user(user_id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_bid_accepted_routes_to_both_parties() {
    let req = bid_accepted("b1", "t1", "client", "tasker", json!({"id": "b1"}));
    assert_eq!(req.event_type(), "bid:accepted");
    assert!(req.keys.contains(&"task:t1".to_string()));
    assert!(req.key_patterns.contains(&"bids:task:t1:*".to_string()));
    assert!(req.key_patterns.contains(&"tasks:list:*".to_string()));
    assert_eq!(
      req.event.targets,
      vec![
        EventTarget::Room(RoomId::task("t1")),
        EventTarget::User("tasker".into()),
        EventTarget::User("client".into()),
      ]
    );
  }

  #[test]
  fn test_targets_are_not_duplicated() {
    let req = task_status_changed("t1", "u1", Some("u1"), json!({}));
    let user_targets = req
      .event
      .targets
      .iter()
      .filter(|t| **t == EventTarget::User("u1".into()))
      .count();
    assert_eq!(user_targets, 1);
  }

  #[test]
  fn test_task_created_is_broadcast() {
    let req = task_created("t9", "u1", json!({"title": "Fix sink"}));
    assert_eq!(req.event.targets, vec![EventTarget::All]);
    assert!(req.keys.contains(&"user:u1:tasks".to_string()));
  }

  #[test]
  fn test_notification_requests() {
    for req in [
      notification_new("u1", json!({})),
      notification_read("u1", json!({})),
      notification_deleted("u1", json!({})),
    ] {
      assert_eq!(req.keys, vec!["notifications:user:u1".to_string()]);
      assert_eq!(req.event.targets, vec![EventTarget::User("u1".into())]);
    }
  }
}
