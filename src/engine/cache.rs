//! Evaluation result cache keyed by a digest of identity, policy epoch,
//! and (optionally) sorted tags.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::rules::{Entity, ValidationResult};

/// A cached `validate` outcome, valid only while `policy_version` matches
/// the engine's current epoch and `now < expires_at`.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub result: ValidationResult,
    pub policy_version: u64,
    pub expires_at: DateTime<Utc>,
}

/// Builds the cache key `SHA-256(type_name | identity | policy_version |
/// sorted_tags?)`, hex-encoded.
pub(crate) fn cache_key(entity: &Entity, policy_version: u64) -> String {
    let mut buf = String::with_capacity(64);
    buf.push_str(std::any::type_name::<Entity>());
    buf.push('|');
    buf.push_str(&entity.identity);
    buf.push('|');
    buf.push_str(&policy_version.to_string());
    if let Some(tags) = &entity.tags {
        buf.push('|');
        let sorted: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
        buf.push_str(&sorted.into_iter().collect::<Vec<_>>().join(","));
    }

    let mut hasher = Sha256::new();
    hasher.update(buf.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_changes_with_policy_version() {
        let entity = Entity::new("e1");
        let key_v1 = cache_key(&entity, 1);
        let key_v2 = cache_key(&entity, 2);
        assert_ne!(key_v1, key_v2);
    }

    #[test]
    fn cache_key_is_order_independent_over_tags() {
        let e1 = Entity::new("e1").with_tags(["b".to_string(), "a".to_string()]);
        let e2 = Entity::new("e1").with_tags(["a".to_string(), "b".to_string()]);
        assert_eq!(cache_key(&e1, 1), cache_key(&e2, 1));
    }
}
