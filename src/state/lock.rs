//! Per-husk state locks.
//!
//! A lock is a small record stored next to the deployment record. It
//! expires on its own so a crashed process cannot wedge a husk forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default lock expiry in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Information about a held lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Husk the lock protects.
    pub husk: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock for `husk` that expires after `expiry_secs`.
    #[must_use]
    pub fn new(husk: &str, holder: &str, expiry_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            husk: husk.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(expiry_secs),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} held by {} since {} ({}s left)",
            self.husk,
            self.holder,
            self.acquired_at.to_rfc3339(),
            self.remaining_secs()
        )
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

/// Uses `holder` if given, otherwise a generated identifier.
pub(crate) fn holder_or_generated(holder: &str) -> String {
    if holder.is_empty() {
        generate_holder_id()
    } else {
        holder.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_creation() {
        let lock = LockInfo::new("web", "test-holder", LOCK_EXPIRY_SECS);
        assert_eq!(lock.holder, "test-holder");
        assert_eq!(lock.husk, "web");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_negative_expiry_is_already_expired() {
        let lock = LockInfo::new("web", "test-holder", -1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);

        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
    }

    #[test]
    fn test_empty_holder_is_generated() {
        assert_eq!(holder_or_generated("me"), "me");
        assert!(holder_or_generated("").contains(&std::process::id().to_string()));
    }
}
