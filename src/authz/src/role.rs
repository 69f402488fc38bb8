//! Role definition and storage

use crate::error::{AuthzError, Result};
use crate::types::RoleId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Role record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role id
    pub id: RoleId,

    /// Unique role name
    pub name: String,

    /// System roles cannot be deleted by administrators
    #[serde(default, rename = "is_system")]
    pub system: bool,
}

impl Role {
    /// Create a non-system role
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            system: false,
        }
    }

    /// Mark as a system role
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }
}

/// Role store trait
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Look up a role by its unique name
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    /// Look up a role by id
    async fn get_role_by_id(&self, id: RoleId) -> Result<Option<Role>>;

    /// Role ids assigned to a principal, used when roles were not attached upstream
    async fn role_ids_of_principal(&self, principal_id: &str) -> Result<Vec<RoleId>>;
}

/// Resolve role names to ids, failing on the first unknown name
pub async fn role_names_to_ids<S>(store: &S, names: &[String]) -> Result<Vec<RoleId>>
where
    S: RoleStore + ?Sized,
{
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let role = store
            .get_role_by_name(name)
            .await?
            .ok_or_else(|| AuthzError::RoleNotFound(name.clone()))?;
        ids.push(role.id);
    }
    Ok(ids)
}

/// Resolve role ids to names, failing on the first unknown id
pub async fn role_ids_to_names<S>(store: &S, ids: &[RoleId]) -> Result<Vec<String>>
where
    S: RoleStore + ?Sized,
{
    let mut names = Vec::with_capacity(ids.len());
    for id in ids {
        let role = store
            .get_role_by_id(*id)
            .await?
            .ok_or_else(|| AuthzError::RoleNotFound(id.to_string()))?;
        names.push(role.name);
    }
    Ok(names)
}

#[derive(Default)]
struct RoleTables {
    roles: HashMap<RoleId, Role>,
    assignments: HashMap<String, Vec<RoleId>>,
}

/// In-memory role store implementation
pub struct InMemoryRoleStore {
    tables: Arc<RwLock<RoleTables>>,
}

impl InMemoryRoleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(RoleTables::default())),
        }
    }

    /// Create a store preloaded with roles
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let tables = RoleTables {
            roles: roles.into_iter().map(|role| (role.id, role)).collect(),
            assignments: HashMap::new(),
        };
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Insert or replace a role
    pub async fn put(&self, role: Role) {
        self.tables.write().await.roles.insert(role.id, role);
    }

    /// Delete a role, refusing system roles
    pub async fn delete(&self, id: RoleId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let role = tables
            .roles
            .get(&id)
            .ok_or_else(|| AuthzError::RoleNotFound(id.to_string()))?;
        if role.system {
            return Err(AuthzError::InvalidInput(format!(
                "system role '{}' cannot be deleted",
                role.name
            )));
        }

        tables.roles.remove(&id);
        for assigned in tables.assignments.values_mut() {
            assigned.retain(|role_id| *role_id != id);
        }
        Ok(())
    }

    /// Replace the role ids assigned to a principal
    pub async fn assign(&self, principal_id: impl Into<String>, roles: Vec<RoleId>) {
        self.tables
            .write()
            .await
            .assignments
            .insert(principal_id.into(), roles);
    }
}

impl Default for InMemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().find(|role| role.name == name).cloned())
    }

    async fn get_role_by_id(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn role_ids_of_principal(&self, principal_id: &str) -> Result<Vec<RoleId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assignments
            .get(principal_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryRoleStore {
        InMemoryRoleStore::with_roles([
            Role::new(1, "super_admin").system(),
            Role::new(2, "editor"),
            Role::new(3, "viewer"),
        ])
    }

    #[tokio::test]
    async fn test_lookup_by_name_and_id() {
        let store = store();

        let editor = store.get_role_by_name("editor").await.unwrap();
        assert_eq!(editor.map(|r| r.id), Some(2));

        let viewer = store.get_role_by_id(3).await.unwrap();
        assert_eq!(viewer.map(|r| r.name), Some("viewer".to_string()));

        assert!(store.get_role_by_name("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_name_id_conversion() {
        let store = store();

        let ids = role_names_to_ids(&store, &["viewer".to_string(), "editor".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec![3, 2]);

        let names = role_ids_to_names(&store, &[1]).await.unwrap();
        assert_eq!(names, vec!["super_admin".to_string()]);

        let missing = role_names_to_ids(&store, &["ghost".to_string()]).await;
        assert!(matches!(missing, Err(AuthzError::RoleNotFound(name)) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_system_role_cannot_be_deleted() {
        let store = store();
        store.assign("user-1", vec![2, 3]).await;

        assert!(store.delete(1).await.is_err());
        store.delete(2).await.unwrap();

        let remaining = store.role_ids_of_principal("user-1").await.unwrap();
        assert_eq!(remaining, vec![3]);
        assert!(store.role_ids_of_principal("nobody").await.unwrap().is_empty());
    }
}
