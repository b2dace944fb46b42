//! Concurrency-safe keyed store for tenants and jobs.
//!
//! Entries are shared as `Arc<T>` so callers can keep working with an entry
//! after the registry lock is released. The lock is never held across I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::Error;

/// What a registry holds, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Tenant,
    Job,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Tenant => f.write_str("tenant"),
            EntityKind::Job => f.write_str("job"),
        }
    }
}

/// Errors from registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound {
                kind: EntityKind::Tenant,
                id,
            } => Error::TenantNotFound(id),
            RegistryError::NotFound {
                kind: EntityKind::Job,
                id,
            } => Error::JobNotFound(id),
            err @ RegistryError::AlreadyExists { .. } => Error::Validation(err.to_string()),
        }
    }
}

/// Keyed store of shared entities.
pub struct Registry<T> {
    kind: EntityKind,
    entries: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T> Registry<T> {
    /// Create an empty registry.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn not_found(&self, id: &str) -> RegistryError {
        RegistryError::NotFound {
            kind: self.kind,
            id: id.to_string(),
        }
    }

    /// Look up an entry.
    pub async fn get(&self, id: &str) -> Result<Arc<T>, RegistryError> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| self.not_found(id))
    }

    /// Insert or overwrite an entry.
    pub async fn add(&self, id: impl Into<String>, value: Arc<T>) {
        self.entries.write().await.insert(id.into(), value);
    }

    /// Insert an entry only if the id is unused.
    pub async fn insert_new(
        &self,
        id: impl Into<String>,
        value: Arc<T>,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return Err(RegistryError::AlreadyExists {
                kind: self.kind,
                id,
            });
        }
        entries.insert(id, value);
        Ok(())
    }

    /// Remove an entry by id, returning it.
    pub async fn delete(&self, id: &str) -> Result<Arc<T>, RegistryError> {
        self.entries
            .write()
            .await
            .remove(id)
            .ok_or_else(|| self.not_found(id))
    }

    /// All entries, ordered by id.
    pub async fn list(&self) -> Vec<Arc<T>> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let registry: Registry<u32> = Registry::new(EntityKind::Job);
        let err = registry.get("nope").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotFound {
                kind: EntityKind::Job,
                id: "nope".to_string()
            }
        );
        assert!(matches!(Error::from(err), Error::JobNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_add_overwrites() {
        let registry = Registry::new(EntityKind::Tenant);
        registry.add("a", Arc::new(1)).await;
        registry.add("a", Arc::new(2)).await;
        assert_eq!(*registry.get("a").await.unwrap(), 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_new_rejects_duplicates() {
        let registry = Registry::new(EntityKind::Job);
        registry.insert_new("a", Arc::new(1)).await.unwrap();
        let err = registry.insert_new("a", Arc::new(2)).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert_eq!(*registry.get("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_given_id_only() {
        let registry = Registry::new(EntityKind::Job);
        registry.add("a", Arc::new(1)).await;
        registry.add("b", Arc::new(2)).await;

        assert_eq!(*registry.delete("a").await.unwrap(), 1);
        assert!(registry.get("a").await.is_err());
        assert_eq!(*registry.get("b").await.unwrap(), 2);
        assert!(matches!(
            registry.delete("a").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_is_ordered() {
        let registry = Registry::new(EntityKind::Tenant);
        registry.add("c", Arc::new(3)).await;
        registry.add("a", Arc::new(1)).await;
        registry.add("b", Arc::new(2)).await;

        let values: Vec<u32> = registry.list().await.iter().map(|v| **v).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_concurrent_inserts() {
        let registry = Arc::new(Registry::new(EntityKind::Job));
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.insert_new(format!("job-{i}"), Arc::new(i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(registry.len().await, 32);
    }
}
