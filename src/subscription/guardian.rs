//! # Guardian Permissions
//!
//! A guardian is a supervising party whose permission may be required
//! before certain events reach the primary recipient. The permission
//! store is an external collaborator; permissions are cached per user
//! for the manager's lifetime, with explicit invalidation (the
//! application owns invalidation policy).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-category notification preferences for a guardian.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Notify on message activity
    #[serde(default)]
    pub messages: bool,

    /// Notify on match activity
    #[serde(default)]
    pub matches: bool,

    /// Notify on general activity
    #[serde(default)]
    pub activity: bool,
}

/// Permission set governing what a guardian may see and approve, and
/// whether the supervised user's activity requires approval at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianPermissions {
    /// Guardian may read the supervised user's messages
    #[serde(default)]
    pub can_view_messages: bool,

    /// Guardian may act on approval requests
    #[serde(default)]
    pub can_approve_matches: bool,

    /// The supervised user's sensitive events require approval
    #[serde(default)]
    pub requires_approval: bool,

    /// Notification preferences
    #[serde(default)]
    pub notifications: NotificationPreferences,
}

impl GuardianPermissions {
    /// No supervision: everything delivers directly.
    pub fn unsupervised() -> Self {
        Self::default()
    }

    /// Whether this permission set belongs to an actual guardian.
    pub fn is_guardian(&self) -> bool {
        self.can_view_messages || self.can_approve_matches
    }
}

/// The guardian-permission store collaborator, keyed by user ID.
#[async_trait]
pub trait GuardianStore: Send + Sync {
    /// Permissions for a user, or None when the user is unsupervised.
    async fn permissions_for(&self, user_id: &str) -> Option<GuardianPermissions>;
}

/// In-memory store, used in tests and as a sane default.
#[derive(Debug, Default)]
pub struct StaticGuardianStore {
    permissions: Mutex<HashMap<String, GuardianPermissions>>,
}

impl StaticGuardianStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<String>, permissions: GuardianPermissions) {
        if let Ok(mut map) = self.permissions.lock() {
            map.insert(user_id.into(), permissions);
        }
    }
}

#[async_trait]
impl GuardianStore for StaticGuardianStore {
    async fn permissions_for(&self, user_id: &str) -> Option<GuardianPermissions> {
        self.permissions
            .lock()
            .ok()
            .and_then(|map| map.get(user_id).cloned())
    }
}

/// Per-user permission cache in front of the store. Entries live for
/// the cache's lifetime; `invalidate` is the only eviction.
pub struct PermissionCache {
    store: std::sync::Arc<dyn GuardianStore>,
    cached: Mutex<HashMap<String, GuardianPermissions>>,
}

impl PermissionCache {
    pub fn new(store: std::sync::Arc<dyn GuardianStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(HashMap::new()),
        }
    }

    /// Permissions for a user; unsupervised when the store has none.
    pub async fn get(&self, user_id: &str) -> GuardianPermissions {
        if let Some(hit) = self
            .cached
            .lock()
            .ok()
            .and_then(|map| map.get(user_id).cloned())
        {
            return hit;
        }

        let permissions = self
            .store
            .permissions_for(user_id)
            .await
            .unwrap_or_else(GuardianPermissions::unsupervised);

        if let Ok(mut map) = self.cached.lock() {
            map.insert(user_id.to_string(), permissions.clone());
        }
        permissions
    }

    /// Drop the cached entry so the next read hits the store.
    pub fn invalidate(&self, user_id: &str) {
        if let Ok(mut map) = self.cached.lock() {
            map.remove(user_id);
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        if let Ok(mut map) = self.cached.lock() {
            map.clear();
        }
    }
}

/// Delivery route for a message under guardian supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRoute {
    /// Deliver to the recipient directly
    Direct,
    /// Deliver to the guardian review queue, suppress direct delivery
    GuardianQueue,
}

/// Decide the route for a message event.
///
/// Approval-gated messages go to the guardian only when the guardian
/// can actually view them; otherwise suppression would silently drop
/// mail the guardian cannot read.
pub fn route_message(permissions: &GuardianPermissions) -> MessageRoute {
    if permissions.requires_approval && permissions.can_view_messages {
        MessageRoute::GuardianQueue
    } else {
        MessageRoute::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cache_hits_store_once() {
        struct CountingStore {
            calls: std::sync::atomic::AtomicU32,
        }

        #[async_trait]
        impl GuardianStore for CountingStore {
            async fn permissions_for(&self, _user_id: &str) -> Option<GuardianPermissions> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Some(GuardianPermissions {
                    can_view_messages: true,
                    ..Default::default()
                })
            }
        }

        let store = Arc::new(CountingStore {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let cache = PermissionCache::new(store.clone());

        cache.get("user-1").await;
        cache.get("user-1").await;
        assert_eq!(store.calls.load(std::sync::atomic::Ordering::Relaxed), 1);

        cache.invalidate("user-1");
        cache.get("user-1").await;
        assert_eq!(store.calls.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_missing_user_is_unsupervised() {
        let cache = PermissionCache::new(Arc::new(StaticGuardianStore::new()));
        let permissions = cache.get("nobody").await;

        assert!(!permissions.requires_approval);
        assert!(!permissions.is_guardian());
        assert_eq!(route_message(&permissions), MessageRoute::Direct);
    }

    #[test]
    fn test_route_decision_table() {
        // requires_approval = false: always direct
        let direct = GuardianPermissions::unsupervised();
        assert_eq!(route_message(&direct), MessageRoute::Direct);

        // requires_approval + can_view_messages: guardian queue
        let queued = GuardianPermissions {
            requires_approval: true,
            can_view_messages: true,
            ..Default::default()
        };
        assert_eq!(route_message(&queued), MessageRoute::GuardianQueue);

        // requires_approval without view permission: direct
        let blind = GuardianPermissions {
            requires_approval: true,
            can_view_messages: false,
            ..Default::default()
        };
        assert_eq!(route_message(&blind), MessageRoute::Direct);
    }

    #[tokio::test]
    async fn test_static_store_roundtrip() {
        let store = StaticGuardianStore::new();
        store.insert(
            "ward-1",
            GuardianPermissions {
                requires_approval: true,
                can_view_messages: true,
                can_approve_matches: true,
                notifications: NotificationPreferences {
                    messages: true,
                    matches: true,
                    activity: false,
                },
            },
        );

        let permissions = store.permissions_for("ward-1").await.unwrap();
        assert!(permissions.requires_approval);
        assert!(permissions.notifications.matches);
        assert!(store.permissions_for("ward-2").await.is_none());
    }
}
