//! Post-mutation cache invalidation and event fan-out.
//!
//! Write paths call [`MutationInvalidationCoordinator::apply`] after a
//! successful commit. Invalidation and delivery are independent best-effort
//! steps; neither can fail the caller.

pub mod keys;
mod requests;

pub use requests::*;

use std::sync::Arc;

use crate::cache::pattern::pattern_prefix;
use crate::cache::DualBackendCache;
use crate::realtime::EventBroadcaster;

/// Outcome of one `apply` call, mostly for logs and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
  /// Exact keys deleted
  pub keys: usize,
  /// Distinct patterns deleted after overlap removal
  pub patterns: usize,
  /// Keys the pattern deletes reported removing
  pub keys_removed: usize,
  /// Sessions the event was queued for
  pub deliveries: usize,
}

pub struct MutationInvalidationCoordinator {
  cache: Arc<DualBackendCache>,
  broadcaster: Arc<EventBroadcaster>,
}

impl MutationInvalidationCoordinator {
  pub fn new(cache: Arc<DualBackendCache>, broadcaster: Arc<EventBroadcaster>) -> Self {
    Self { cache, broadcaster }
  }

  pub async fn apply(&self, request: InvalidationRequest) -> InvalidationReport {
    let event_type = request.event_type();
    let patterns = collapse_patterns(&request.key_patterns);
    let keys = uncovered_keys(&request.keys, &patterns);

    let mut report = InvalidationReport {
      keys: keys.len(),
      patterns: patterns.len(),
      ..Default::default()
    };

    for key in &keys {
      self.cache.delete(key).await;
    }
    for pattern in &patterns {
      report.keys_removed += self.cache.delete_pattern(pattern).await;
    }

    let RoutedEvent { event, targets } = request.event;
    report.deliveries = self.broadcaster.emit_to_targets(&targets, event);

    tracing::debug!(
      event_type,
      keys = report.keys,
      patterns = report.patterns,
      keys_removed = report.keys_removed,
      deliveries = report.deliveries,
      "mutation applied"
    );
    report
  }
}

/// Deduplicate patterns and drop any already covered by a shorter one,
/// so each stored key is deleted by exactly one pattern.
pub fn collapse_patterns(patterns: &[String]) -> Vec<String> {
  let mut prefixes: Vec<&str> = patterns.iter().map(|p| pattern_prefix(p)).collect();
  prefixes.sort_unstable();
  prefixes.dedup();

  let mut kept: Vec<&str> = Vec::with_capacity(prefixes.len());
  for prefix in prefixes {
    if !kept.iter().any(|k| prefix.starts_with(k)) {
      kept.push(prefix);
    }
  }
  kept.into_iter().map(|p| format!("{}*", p)).collect()
}

fn uncovered_keys(keys: &[String], patterns: &[String]) -> Vec<String> {
  let mut out: Vec<String> = Vec::with_capacity(keys.len());
  for key in keys {
    let covered = patterns.iter().any(|p| key.starts_with(pattern_prefix(p)));
    if !covered && !out.contains(key) {
      out.push(key.clone());
    }
  }
  out
}
