//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use taskhub::cache::{RemoteCache, RemoteCommand, RemoteError, RemoteReply};

/// In-memory stand-in for the shared store with Redis-like replies
pub struct FakeRemote {
  entries: Mutex<HashMap<String, (String, Instant)>>,
  healthy: AtomicBool,
  failing: AtomicBool,
  commands: AtomicUsize,
}

impl FakeRemote {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      healthy: AtomicBool::new(true),
      failing: AtomicBool::new(false),
      commands: AtomicUsize::new(0),
    }
  }

  /// Reports unhealthy, so the façade never calls it
  pub fn unhealthy() -> Self {
    let remote = Self::new();
    remote.set_healthy(false);
    remote
  }

  /// Reports healthy but every command errors
  pub fn failing() -> Self {
    let remote = Self::new();
    remote.failing.store(true, Ordering::SeqCst);
    remote
  }

  pub fn set_healthy(&self, healthy: bool) {
    self.healthy.store(healthy, Ordering::SeqCst);
  }

  pub fn commands(&self) -> usize {
    self.commands.load(Ordering::SeqCst)
  }

  pub fn raw_insert(&self, key: &str, value: &str) {
    self.entries.lock().insert(
      key.to_string(),
      (value.to_string(), Instant::now() + Duration::from_secs(3600)),
    );
  }

  pub fn raw_get(&self, key: &str) -> Option<String> {
    self.entries.lock().get(key).map(|(v, _)| v.clone())
  }

  pub fn contains(&self, key: &str) -> bool {
    self.live_keys().iter().any(|k| k == key)
  }

  pub fn live_keys(&self) -> Vec<String> {
    let now = Instant::now();
    let mut keys: Vec<String> = self
      .entries
      .lock()
      .iter()
      .filter(|(_, (_, deadline))| *deadline > now)
      .map(|(k, _)| k.clone())
      .collect();
    keys.sort();
    keys
  }
}

#[async_trait]
impl RemoteCache for FakeRemote {
  fn is_healthy(&self) -> bool {
    self.healthy.load(Ordering::SeqCst)
  }

  async fn execute(&self, command: RemoteCommand) -> Result<RemoteReply, RemoteError> {
    self.commands.fetch_add(1, Ordering::SeqCst);
    if self.failing.load(Ordering::SeqCst) {
      return Err(RemoteError::Command {
        command: command.name(),
        message: "injected failure".into(),
      });
    }

    let now = Instant::now();
    let mut entries = self.entries.lock();
    entries.retain(|_, (_, deadline)| *deadline > now);

    let reply = match command {
      RemoteCommand::Get { key } => match entries.get(&key) {
        Some((value, _)) => RemoteReply::Bulk(value.clone()),
        None => RemoteReply::Nil,
      },
      RemoteCommand::Set { key, value, ttl } => {
        entries.insert(key, (value, now + ttl));
        RemoteReply::Ok
      }
      RemoteCommand::Del { keys } => {
        let removed = keys.iter().filter(|k| entries.remove(*k).is_some()).count();
        RemoteReply::Integer(removed as i64)
      }
      RemoteCommand::Keys { pattern } => {
        let mut keys: Vec<String> = entries
          .keys()
          .filter(|k| glob_match(&pattern, k))
          .cloned()
          .collect();
        keys.sort();
        RemoteReply::Array(keys)
      }
      RemoteCommand::Exists { key } => RemoteReply::Integer(entries.contains_key(&key) as i64),
      RemoteCommand::Ttl { key } => match entries.get(&key) {
        Some((_, deadline)) => {
          let ms = deadline.duration_since(now).as_millis() as i64;
          RemoteReply::Integer((ms + 999) / 1000)
        }
        None => RemoteReply::Integer(-2),
      },
      RemoteCommand::Expire { key, ttl } => match entries.get_mut(&key) {
        Some(entry) => {
          entry.1 = now + ttl;
          RemoteReply::Integer(1)
        }
        None => RemoteReply::Integer(0),
      },
      RemoteCommand::Info => RemoteReply::Bulk("# Memory\r\nused_memory:4096\r\n".into()),
      RemoteCommand::Ping => RemoteReply::Status("PONG".into()),
    };
    Ok(reply)
  }
}

/// Redis glob subset: `*`, `?` and backslash escapes
fn glob_match(pattern: &str, text: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let t: Vec<char> = text.chars().collect();
  matches_from(&p, &t)
}

fn matches_from(p: &[char], t: &[char]) -> bool {
  match p.first() {
    None => t.is_empty(),
    Some('*') => (0..=t.len()).any(|i| matches_from(&p[1..], &t[i..])),
    Some('?') => !t.is_empty() && matches_from(&p[1..], &t[1..]),
    Some('\\') if p.len() > 1 => t.first() == Some(&p[1]) && matches_from(&p[2..], &t[1..]),
    Some(c) => t.first() == Some(c) && matches_from(&p[1..], &t[1..]),
  }
}
