//! # AccessMap Grant Enumeration
//!
//! Answers the two inverse questions of an access-control policy:
//!
//! - **by subject**: what can a user do, and in which domains?
//! - **by resource**: who can perform an action on a resource type (or a
//!   specific instance), across which domains?
//!
//! The engine never evaluates policy itself. It derives a finite candidate
//! space from the stored policy and role-assignment tuples and probes an
//! injected [`DecisionOracle`] pointwise, trying the `"*"` resource id before
//! any concrete id.
//!
//! ## Example
//!
//! ```rust
//! use accessmap_grants::{
//!     GrantEnumerator, InMemoryTupleStore, PolicyRule, RbacOracle, ResourceCatalog,
//!     RoleAssignment, Snapshot,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let snapshot = Snapshot::new(
//!         vec![PolicyRule::new("editor", "org1", "property", "write")],
//!         vec![RoleAssignment::new("alice", "editor", "org1")],
//!     );
//!
//!     let oracle = Arc::new(RbacOracle::from_snapshot(&snapshot));
//!     let store = Arc::new(InMemoryTupleStore::from_snapshot(snapshot));
//!     let catalog = ResourceCatalog::parse("property:write")?;
//!
//!     let enumerator = GrantEnumerator::new(store, oracle, catalog);
//!     let access = enumerator.enumerate_by_subject("alice").await?;
//!
//!     assert_eq!(access.access.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod store;
pub mod candidate;
pub mod oracle;
pub mod engine;
pub mod view;

// Re-export commonly used types
pub use types::{AccessTuple, Grant, GrantQuery, PolicyRule, RoleAssignment, WILDCARD};
pub use error::{GrantError, Result};
pub use store::{InMemoryTupleStore, Snapshot, StoreError, TupleStore};
pub use candidate::{CandidateSpace, ResourceCatalog};
pub use oracle::{DecisionOracle, RbacOracle};
pub use engine::{EngineMetrics, EnumeratorConfig, GrantEnumerator, MetricsCollector};
pub use view::{AccessByDomain, AccessEntry, AccessList};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
