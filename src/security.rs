//! Credential comparison helpers

use sha2::{Digest, Sha256};

/// Constant-time string comparison to prevent timing attacks.
/// Returns true if both strings are equal.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
  if a.len() != b.len() {
    return false;
  }

  let mut result: u8 = 0;
  for (x, y) in a.bytes().zip(b.bytes()) {
    result |= x ^ y;
  }
  result == 0
}

/// Hash a value using SHA-256 and return as hex string
pub fn hash_sha256(value: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(value.as_bytes());
  format!("{:x}", hasher.finalize())
}
