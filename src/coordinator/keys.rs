//! Cache key layout shared by read-path lookups and write-path invalidation.
//!
//! Read paths cache under the plain keys. Invalidation drops the plain key
//! exactly and everything below it through [`children`], so `task:1` never
//! takes `task:10` with it.

/// Root of paginated/filtered task listings, `tasks:list:{query hash}`
pub fn tasks_list() -> String {
  "tasks:list".to_string()
}

pub fn tasks_search() -> String {
  "tasks:search".to_string()
}

pub fn task(task_id: &str) -> String {
  format!("task:{}", task_id)
}

pub fn task_bids(task_id: &str) -> String {
  format!("bids:task:{}", task_id)
}

pub fn bid(bid_id: &str) -> String {
  format!("bid:{}", bid_id)
}

pub fn user_tasks(user_id: &str) -> String {
  format!("user:{}:tasks", user_id)
}

pub fn user_bids(user_id: &str) -> String {
  format!("user:{}:bids", user_id)
}

pub fn user_notifications(user_id: &str) -> String {
  format!("notifications:user:{}", user_id)
}

/// Pattern for every key nested below `key`, e.g. `task:1:bids:page:2`
pub fn children(key: &str) -> String {
  format!("{}:*", key)
}
