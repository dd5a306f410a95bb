//! Key namespacing and prefix patterns

/// Formats caller keys as `{app_prefix}:cache:{key}` so that clears and
/// pattern deletes never touch unrelated data in a shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
  root: String,
}

impl KeyNamespace {
  pub fn new(app_prefix: &str) -> Self {
    Self {
      root: format!("{}:cache:", app_prefix),
    }
  }

  /// Namespaced form of a caller key
  pub fn key(&self, key: &str) -> String {
    format!("{}{}", self.root, key)
  }

  /// Strip the namespace back off a stored key
  pub fn strip<'a>(&self, full_key: &'a str) -> Option<&'a str> {
    full_key.strip_prefix(self.root.as_str())
  }

  /// Namespaced literal prefix for a caller pattern.
  ///
  /// A trailing `*` means "any suffix"; a pattern without one is still
  /// treated as a prefix.
  pub fn prefix(&self, pattern: &str) -> String {
    self.key(pattern_prefix(pattern))
  }

  /// Redis glob for a caller pattern with every glob metacharacter in the
  /// literal part escaped
  pub fn glob(&self, pattern: &str) -> String {
    let mut glob = escape_glob(&self.prefix(pattern));
    glob.push('*');
    glob
  }

  /// Glob matching every key in the namespace
  pub fn all(&self) -> String {
    format!("{}*", escape_glob(&self.root))
  }
}

/// Literal part of a pattern (trailing `*`s removed)
pub fn pattern_prefix(pattern: &str) -> &str {
  pattern.trim_end_matches('*')
}

/// Prefix match used by the local store's linear scan
pub fn matches_prefix(key: &str, prefix: &str) -> bool {
  key.starts_with(prefix)
}

fn escape_glob(literal: &str) -> String {
  let mut escaped = String::with_capacity(literal.len() + 4);
  for c in literal.chars() {
    if matches!(c, '*' | '?' | '[' | ']' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}
