//! Read-only access to policy and role-assignment tuples

use crate::error::GrantError;
use crate::types::{PolicyRule, RoleAssignment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub mod loader;

pub use loader::{load_casbin_csv, load_json, load_path};

/// Tuple store failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing storage could not be reached
    #[error("tuple store unavailable: {0}")]
    Unavailable(String),

    /// Backing storage returned something unreadable
    #[error("tuple store corrupted: {0}")]
    Corrupted(String),
}

/// A store that cannot be read means no decision can be made
impl From<StoreError> for GrantError {
    fn from(err: StoreError) -> Self {
        GrantError::OracleUnavailable(err.to_string())
    }
}

/// Both tuple collections, read together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub policies: Vec<PolicyRule>,

    #[serde(default)]
    pub role_assignments: Vec<RoleAssignment>,
}

impl Snapshot {
    pub fn new(policies: Vec<PolicyRule>, role_assignments: Vec<RoleAssignment>) -> Self {
        Self {
            policies,
            role_assignments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty() && self.role_assignments.is_empty()
    }
}

/// Tuple store trait
///
/// Implementations own the tuples; the enumeration engine only reads them.
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// All policy rules
    async fn policies(&self) -> std::result::Result<Vec<PolicyRule>, StoreError>;

    /// All role assignments
    async fn role_assignments(&self) -> std::result::Result<Vec<RoleAssignment>, StoreError>;

    /// Read both collections for one request
    async fn snapshot(&self) -> std::result::Result<Snapshot, StoreError> {
        Ok(Snapshot {
            policies: self.policies().await?,
            role_assignments: self.role_assignments().await?,
        })
    }
}

/// In-memory tuple store implementation
pub struct InMemoryTupleStore {
    snapshot: Arc<RwLock<Snapshot>>,
}

impl InMemoryTupleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    /// Create a store holding the given tuples
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
        }
    }
}

impl Default for InMemoryTupleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TupleStore for InMemoryTupleStore {
    async fn policies(&self) -> std::result::Result<Vec<PolicyRule>, StoreError> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot.policies.clone())
    }

    async fn role_assignments(&self) -> std::result::Result<Vec<RoleAssignment>, StoreError> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot.role_assignments.clone())
    }

    // One lock acquisition so both halves come from the same state.
    async fn snapshot(&self) -> std::result::Result<Snapshot, StoreError> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_snapshot() {
        let store = InMemoryTupleStore::from_snapshot(Snapshot::new(
            vec![PolicyRule::new("editor", "org1", "property", "write")],
            vec![RoleAssignment::new("alice", "editor", "org1")],
        ));

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.policies.len(), 1);
        assert_eq!(snapshot.role_assignments.len(), 1);
        assert_eq!(store.policies().await.unwrap(), snapshot.policies);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemoryTupleStore::new();
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[test]
    fn test_store_error_maps_to_oracle_unavailable() {
        let err: GrantError = StoreError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, GrantError::OracleUnavailable(msg) if msg.contains("connection refused")));
    }
}
