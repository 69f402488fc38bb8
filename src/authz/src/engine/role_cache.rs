//! Role name and super-role resolution cache
//!
//! Role identities change far less often than rules, so this cache has its
//! own lock and is only cleared by an explicit [`RoleCache::refresh`].

use crate::error::{AuthzError, Result};
use crate::role::RoleStore;
use crate::types::RoleId;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct RoleCacheState {
    super_role_id: Option<RoleId>,
    by_name: HashMap<String, RoleId>,
}

/// Memoizes role name → id lookups and the super-role id
pub struct RoleCache {
    store: Arc<dyn RoleStore>,
    super_role_name: Option<String>,
    state: RwLock<RoleCacheState>,
}

impl RoleCache {
    /// Create a role cache; `super_role_name = None` disables the bypass
    pub fn new(store: Arc<dyn RoleStore>, super_role_name: Option<String>) -> Self {
        Self {
            store,
            super_role_name,
            state: RwLock::new(RoleCacheState::default()),
        }
    }

    /// Id of the configured super role.
    ///
    /// Returns `None` when no super role is configured, when the role does not
    /// exist, or when the store fails; only a successful lookup is memoized.
    pub async fn super_role_id(&self) -> Option<RoleId> {
        let name = self.super_role_name.as_deref()?;

        let cached = self.state.read().super_role_id;
        if cached.is_some() {
            return cached;
        }

        match self.store.get_role_by_name(name).await {
            Ok(Some(role)) => {
                let mut state = self.state.write();
                state.super_role_id = Some(role.id);
                state.by_name.insert(name.to_string(), role.id);
                Some(role.id)
            }
            Ok(None) => {
                debug!(role = name, "Super role not defined, bypass inactive");
                None
            }
            Err(e) => {
                warn!(role = name, "Failed to resolve super role: {}", e);
                None
            }
        }
    }

    /// Id of the role with the given name
    pub async fn role_id_by_name(&self, name: &str) -> Result<RoleId> {
        let cached = self.state.read().by_name.get(name).copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let role = self
            .store
            .get_role_by_name(name)
            .await?
            .ok_or_else(|| AuthzError::RoleNotFound(name.to_string()))?;

        self.state.write().by_name.insert(name.to_string(), role.id);
        Ok(role.id)
    }

    /// Role ids of a principal whose roles were not attached upstream
    pub async fn role_ids_of_principal(&self, principal_id: &str) -> Result<HashSet<RoleId>> {
        let roles = self.store.role_ids_of_principal(principal_id).await?;
        Ok(roles.into_iter().collect())
    }

    /// Drop every memoized entry and re-resolve the super role
    pub async fn refresh(&self) {
        *self.state.write() = RoleCacheState::default();
        debug!("Role cache cleared");
        self.super_role_id().await;
    }

    /// Number of memoized role names
    pub fn cached_names(&self) -> usize {
        self.state.read().by_name.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{InMemoryRoleStore, Role};

    fn store() -> Arc<InMemoryRoleStore> {
        Arc::new(InMemoryRoleStore::with_roles([
            Role::new(1, "super_admin").system(),
            Role::new(2, "editor"),
        ]))
    }

    #[tokio::test]
    async fn test_super_role_resolution() {
        let cache = RoleCache::new(store(), Some("super_admin".to_string()));
        assert_eq!(cache.super_role_id().await, Some(1));
        assert_eq!(cache.cached_names(), 1);

        let disabled = RoleCache::new(store(), None);
        assert_eq!(disabled.super_role_id().await, None);

        let missing = RoleCache::new(store(), Some("root".to_string()));
        assert_eq!(missing.super_role_id().await, None);
    }

    #[tokio::test]
    async fn test_role_name_memoized_until_refresh() {
        let store = store();
        let cache = RoleCache::new(store.clone(), None);

        assert_eq!(cache.role_id_by_name("editor").await.unwrap(), 2);

        // Renumbering in the store is not visible until refresh
        store.put(Role::new(7, "editor")).await;
        store.delete(2).await.unwrap();
        assert_eq!(cache.role_id_by_name("editor").await.unwrap(), 2);

        cache.refresh().await;
        assert_eq!(cache.role_id_by_name("editor").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unknown_role_not_memoized() {
        let store = store();
        let cache = RoleCache::new(store.clone(), None);

        let err = cache.role_id_by_name("auditor").await.unwrap_err();
        assert!(matches!(err, AuthzError::RoleNotFound(_)));

        store.put(Role::new(9, "auditor")).await;
        assert_eq!(cache.role_id_by_name("auditor").await.unwrap(), 9);
    }
}
