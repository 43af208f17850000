//! TTL lock records and key namespacing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

/// A mutual-exclusion record held in the lock store.
///
/// Only the holder presenting the matching `owner` token may delete a
/// record. Once `expires_at` has passed the record is dead and any other
/// owner may overwrite it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRecord {
    pub key: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Generate a fresh owner token for one acquisition attempt.
pub fn new_owner_token() -> String {
    Uuid::new_v4().to_string()
}

/// Key of the fleet-wide single-flight lock for a job.
pub fn global_lock_key(job_name: &str) -> String {
    format!("{job_name}_crontab_lock")
}

/// Key of the per-resource lock for a job.
pub fn resource_lock_key(job_name: &str, resource_id: impl Display) -> String {
    format!("{job_name}:resource:{resource_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_keys_are_stable() {
        assert_eq!(global_lock_key("topic_compensation"), "topic_compensation_crontab_lock");
        assert_eq!(
            resource_lock_key("topic_compensation", 12),
            "topic_compensation:resource:12"
        );
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        assert_ne!(new_owner_token(), new_owner_token());
    }
}
