//! Per-user permission trees for ACL-based authorization.
//!
//! This crate derives an all-deny default tree (resource -> operation ->
//! access kind) from a resource registry, resolves each user's rules across
//! their roles into a copy of that tree, and caches the result per user with
//! an optional durable snapshot. Resolution is fail-closed: no relevant rule
//! means deny. Use [`Engine`] for tree queries and [`RuleResolver`] for single
//! decisions.
//!
//! # Examples
//!
//! Building a tree with the in-memory collaborators (enable `memory-store`):
//! ```no_run
//! use rs_acl_tree::{
//!     AccessKind, EngineBuilder, OperationName, Principal, PrincipalType, ResourceName,
//!     RoleName, Rule, RulePermission, UserId,
//! };
//! # #[cfg(feature = "memory-store")]
//! # async fn demo() -> rs_acl_tree::Result<()> {
//! use rs_acl_tree::{MemoryRegistry, MemoryRuleStore};
//! let order = ResourceName::try_from("Order")?;
//! let cancel = OperationName::try_from("cancel")?;
//!
//! let registry = MemoryRegistry::new();
//! registry.add_resource(order.clone(), vec![cancel.clone()]);
//! let rules = MemoryRuleStore::new();
//! rules.add_rule(
//!     Rule::new(PrincipalType::Role, "admin", order.clone(), RulePermission::Allow)
//!         .for_operation(cancel.clone())
//!         .for_access(AccessKind::Execute),
//! );
//!
//! let engine = EngineBuilder::new(registry, rules).build().await;
//! let user = Principal::new(UserId::from_numeric(1)).with_role(RoleName::try_from("admin")?);
//! let allowed = engine
//!     .get_permission(&user, &order, &cancel, AccessKind::Execute)
//!     .await?;
//! assert!(allowed);
//! # Ok(())
//! # }
//! ```
//!
//! Persisting trees across restarts:
//! ```no_run
//! use rs_acl_tree::DiskStore;
//! use std::time::Duration;
//! # fn demo() -> rs_acl_tree::Result<()> {
//! let store = DiskStore::new("diskcache", "userPermissionTrees")?
//!     .with_ttl(Some(Duration::from_secs(24 * 60 * 60)));
//! # let _ = store;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod cache;
mod config;
mod default_tree;
mod disk_store;
mod engine;
mod error;
mod principal;
mod resolver;
mod rule;
mod store;
mod tree;
mod types;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(feature = "axum")]
pub mod axum;

pub use crate::cache::{NoPersistence, Persistence, TreeCache};
pub use crate::config::{
    CacheConfig, Config, ModelBindings, RoleMergePolicy, StaleTreePolicy, WritebackPolicy,
};
pub use crate::default_tree::DefaultTree;
pub use crate::disk_store::DiskStore;
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::error::{Error, Result, StoreError};
pub use crate::principal::{Principal, PrincipalRecord, RawId, RoleRef};
pub use crate::resolver::RuleResolver;
pub use crate::rule::{AccessRequest, PrincipalType, Rule, RulePermission, Selector};
pub use crate::store::{RegistryEntry, ResourceRegistry, RuleStore};
pub use crate::tree::{AccessMap, Coordinate, PermissionTree, TreeShape};
pub use crate::types::{AccessKind, AppId, OperationName, ResourceName, RoleName, UserId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::{MemoryRegistry, MemoryRuleStore};
