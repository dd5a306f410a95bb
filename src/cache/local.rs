//! Bounded in-process fallback store
//!
//! Fixed capacity with oldest-inserted eviction. The `lru` list is only ever
//! read through `peek`, so its recency order stays equal to insertion order.
//! Every operation takes the lock once, which keeps eviction-then-insert
//! atomic per call.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::entry::CacheEntry;
use super::pattern::matches_prefix;

struct LocalState {
  entries: LruCache<String, CacheEntry>,
  memory_used: usize,
}

impl LocalState {
  fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    let entry = self.entries.pop(key)?;
    self.memory_used = self.memory_used.saturating_sub(entry.size);
    Some(entry)
  }
}

pub struct BoundedLocalCache {
  state: Mutex<LocalState>,
  capacity: NonZeroUsize,
  evictions: AtomicU64,
  expired: AtomicU64,
}

impl BoundedLocalCache {
  pub fn new(capacity: usize) -> Self {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Self {
      state: Mutex::new(LocalState {
        entries: LruCache::new(capacity),
        memory_used: 0,
      }),
      capacity,
      evictions: AtomicU64::new(0),
      expired: AtomicU64::new(0),
    }
  }

  /// Store a value. Overwriting keeps the key's original insertion slot;
  /// a new key at capacity evicts the oldest-inserted entry first.
  pub fn set(&self, key: &str, value: String, ttl: Duration) {
    let entry = CacheEntry::new(key.to_string(), value, ttl);
    let mut guard = self.state.lock();
    let state = &mut *guard;

    if let Some(existing) = state.entries.peek_mut(key) {
      let old = std::mem::replace(existing, entry);
      state.memory_used = state.memory_used.saturating_sub(old.size) + existing.size;
      return;
    }

    if state.entries.len() >= self.capacity.get() {
      if let Some((evicted_key, evicted)) = state.entries.pop_lru() {
        state.memory_used = state.memory_used.saturating_sub(evicted.size);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = %evicted_key, "evicted oldest local cache entry");
      }
    }

    state.memory_used += entry.size;
    state.entries.push(key.to_string(), entry);
  }

  /// Read a live value; an expired entry is removed as a side effect
  pub fn get(&self, key: &str) -> Option<String> {
    let mut state = self.state.lock();
    match state.entries.peek(key) {
      Some(entry) if entry.is_live() => Some(entry.value.clone()),
      Some(_) => {
        state.remove(key);
        self.expired.fetch_add(1, Ordering::Relaxed);
        None
      }
      None => None,
    }
  }

  pub fn delete(&self, key: &str) -> bool {
    self.state.lock().remove(key).is_some()
  }

  /// Remove every key starting with `prefix`. Linear in the store size.
  pub fn delete_prefix(&self, prefix: &str) -> usize {
    let mut state = self.state.lock();
    let doomed: Vec<String> = state
      .entries
      .iter()
      .filter(|(k, _)| matches_prefix(k, prefix))
      .map(|(k, _)| k.clone())
      .collect();
    for key in &doomed {
      state.remove(key);
    }
    doomed.len()
  }

  pub fn exists(&self, key: &str) -> bool {
    self.get_entry_remaining(key).is_some()
  }

  /// Remaining lifetime of a live entry
  pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
    self.get_entry_remaining(key)
  }

  /// Restart a live entry's lifetime with `ttl`
  pub fn extend(&self, key: &str, ttl: Duration) -> bool {
    let mut state = self.state.lock();
    match state.entries.peek_mut(key) {
      Some(entry) if entry.is_live() => {
        entry.renew(ttl);
        true
      }
      Some(_) => {
        state.remove(key);
        self.expired.fetch_add(1, Ordering::Relaxed);
        false
      }
      None => false,
    }
  }

  pub fn clear(&self) {
    let mut state = self.state.lock();
    state.entries.clear();
    state.memory_used = 0;
  }

  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn capacity(&self) -> usize {
    self.capacity.get()
  }

  pub fn memory_used(&self) -> usize {
    self.state.lock().memory_used
  }

  pub fn evictions(&self) -> u64 {
    self.evictions.load(Ordering::Relaxed)
  }

  pub fn expired(&self) -> u64 {
    self.expired.load(Ordering::Relaxed)
  }

  fn get_entry_remaining(&self, key: &str) -> Option<Duration> {
    let mut state = self.state.lock();
    let remaining = state.entries.peek(key).map(|e| e.ttl_remaining())?;
    if remaining.is_none() {
      state.remove(key);
      self.expired.fetch_add(1, Ordering::Relaxed);
    }
    remaining
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINUTE: Duration = Duration::from_secs(60);

  #[test]
  fn test_set_get_delete() {
    let cache = BoundedLocalCache::new(10);
    cache.set("a", "1".into(), MINUTE);
    assert_eq!(cache.get("a").as_deref(), Some("1"));
    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    assert!(cache.get("a").is_none());
  }

  #[test]
  fn test_evicts_oldest_inserted_not_least_recently_read() {
    let cache = BoundedLocalCache::new(2);
    cache.set("first", "1".into(), MINUTE);
    cache.set("second", "2".into(), MINUTE);
    // reading does not refresh insertion order
    assert!(cache.get("first").is_some());
    cache.set("third", "3".into(), MINUTE);

    assert!(cache.get("first").is_none());
    assert!(cache.get("second").is_some());
    assert!(cache.get("third").is_some());
    assert_eq!(cache.evictions(), 1);
  }

  #[test]
  fn test_overwrite_does_not_evict() {
    let cache = BoundedLocalCache::new(2);
    cache.set("a", "1".into(), MINUTE);
    cache.set("b", "2".into(), MINUTE);
    cache.set("a", "10".into(), MINUTE);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a").as_deref(), Some("10"));
    assert_eq!(cache.evictions(), 0);

    // "a" kept its original slot, so it is still the oldest
    cache.set("c", "3".into(), MINUTE);
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
  }

  #[test]
  fn test_expired_entry_removed_on_read() {
    let cache = BoundedLocalCache::new(4);
    cache.set("gone", "1".into(), Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(cache.len(), 1);
    assert!(cache.get("gone").is_none());
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.expired(), 1);
  }

  #[test]
  fn test_delete_prefix() {
    let cache = BoundedLocalCache::new(10);
    cache.set("task:1:x", "1".into(), MINUTE);
    cache.set("task:1:y", "2".into(), MINUTE);
    cache.set("task:2:z", "3".into(), MINUTE);

    assert_eq!(cache.delete_prefix("task:1:"), 2);
    assert!(cache.get("task:2:z").is_some());
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_memory_accounting() {
    let cache = BoundedLocalCache::new(10);
    cache.set("ab", "1234".into(), MINUTE);
    assert_eq!(cache.memory_used(), 6);
    cache.set("ab", "12".into(), MINUTE);
    assert_eq!(cache.memory_used(), 4);
    cache.clear();
    assert_eq!(cache.memory_used(), 0);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_extend_and_ttl() {
    let cache = BoundedLocalCache::new(10);
    cache.set("k", "1".into(), Duration::from_secs(5));
    assert!(cache.extend("k", Duration::from_secs(120)));
    let remaining = cache.ttl_remaining("k").unwrap();
    assert!(remaining > Duration::from_secs(100));
    assert!(!cache.extend("missing", MINUTE));
  }

  #[test]
  fn test_zero_capacity_is_clamped() {
    let cache = BoundedLocalCache::new(0);
    assert_eq!(cache.capacity(), 1);
    cache.set("a", "1".into(), MINUTE);
    cache.set("b", "2".into(), MINUTE);
    assert_eq!(cache.len(), 1);
    assert!(cache.get("b").is_some());
  }
}
