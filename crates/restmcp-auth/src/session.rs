//! Session identity map
//!
//! A caller starts out with a temporary session *handle*. When a login
//! completes with an ID token, the handle is upgraded to a durable
//! *principal* and all later storage for that session goes under the
//! principal key. Upgrades are monotonic: once a handle maps to a principal
//! it never reverts or changes.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::context::session_tag;

/// Result of an upgrade attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The handle now maps to the principal
    Upgraded,
    /// The handle already mapped to this principal
    AlreadyUpgraded,
    /// The handle already maps to a different principal; the mapping is unchanged
    Conflict {
        /// Principal the handle keeps mapping to
        existing: String,
    },
}

/// Concurrent handle to principal map, shared via `Arc`
#[derive(Debug, Default)]
pub struct SessionIdentityMap {
    principals: DashMap<String, String>,
}

impl SessionIdentityMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a session key. Unknown handles resolve to themselves.
    pub fn resolve(&self, session_key: &str) -> String {
        self.principals
            .get(session_key)
            .map(|principal| principal.value().clone())
            .unwrap_or_else(|| session_key.to_string())
    }

    /// Map `handle` to `principal`, atomically per handle.
    ///
    /// The first upgrade wins. A later attempt with a different principal is
    /// reported as [`UpgradeOutcome::Conflict`] and leaves the mapping as is.
    pub fn upgrade(&self, handle: &str, principal: &str) -> UpgradeOutcome {
        if handle == principal {
            return UpgradeOutcome::AlreadyUpgraded;
        }
        match self.principals.entry(handle.to_string()) {
            Entry::Occupied(entry) if entry.get() == principal => UpgradeOutcome::AlreadyUpgraded,
            Entry::Occupied(entry) => {
                warn!(
                    session = %session_tag(handle),
                    "Session already upgraded to a different principal, keeping existing mapping"
                );
                UpgradeOutcome::Conflict {
                    existing: entry.get().clone(),
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(principal.to_string());
                info!(
                    session = %session_tag(handle),
                    principal = %session_tag(principal),
                    "Session upgraded to principal"
                );
                UpgradeOutcome::Upgraded
            }
        }
    }

    /// Whether `handle` has been upgraded
    pub fn is_upgraded(&self, handle: &str) -> bool {
        self.principals.contains_key(handle)
    }

    /// Number of upgraded handles
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Whether no handle has been upgraded
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_resolve_defaults_to_identity() {
        let map = SessionIdentityMap::new();
        assert_eq!(map.resolve("h1"), "h1");
        assert!(!map.is_upgraded("h1"));
    }

    #[test]
    fn test_upgrade_is_monotonic() {
        let map = SessionIdentityMap::new();
        assert_eq!(map.upgrade("h1", "u42"), UpgradeOutcome::Upgraded);
        assert_eq!(map.resolve("h1"), "u42");

        assert_eq!(map.upgrade("h1", "u42"), UpgradeOutcome::AlreadyUpgraded);
        assert_eq!(
            map.upgrade("h1", "u99"),
            UpgradeOutcome::Conflict {
                existing: "u42".into()
            }
        );
        assert_eq!(map.resolve("h1"), "u42");
    }

    #[test]
    fn test_self_upgrade_is_noop() {
        let map = SessionIdentityMap::new();
        assert_eq!(map.upgrade("u1", "u1"), UpgradeOutcome::AlreadyUpgraded);
        assert!(map.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upgrades_have_one_winner() {
        let map = Arc::new(SessionIdentityMap::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let map = Arc::clone(&map);
            handles.push(tokio::spawn(async move {
                map.upgrade("h1", &format!("u{}", i))
            }));
        }

        let mut upgraded = 0;
        for handle in handles {
            if handle.await.unwrap() == UpgradeOutcome::Upgraded {
                upgraded += 1;
            }
        }
        assert_eq!(upgraded, 1);
        assert_eq!(map.len(), 1);
    }
}
