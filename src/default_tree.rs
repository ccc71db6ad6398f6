use std::sync::{Arc, OnceLock};

use crate::store::ResourceRegistry;
use crate::tree::PermissionTree;
use crate::types::AccessKind;

/// Process-wide template tree, built once from the registry.
///
/// Every leaf is `false`. The first call to [`DefaultTree::get`] builds the
/// tree; concurrent first callers block on the same initialization, and later
/// calls return the same `Arc`.
#[derive(Debug)]
pub struct DefaultTree {
    kinds: Vec<AccessKind>,
    memo: OnceLock<Arc<PermissionTree>>,
}

impl DefaultTree {
    pub fn new(kinds: Vec<AccessKind>) -> Self {
        Self {
            kinds,
            memo: OnceLock::new(),
        }
    }

    pub fn kinds(&self) -> &[AccessKind] {
        &self.kinds
    }

    /// Returns the memoized tree, building it on first use.
    pub fn get(&self, registry: &dyn ResourceRegistry) -> Arc<PermissionTree> {
        self.memo
            .get_or_init(|| Arc::new(Self::build(registry, &self.kinds)))
            .clone()
    }

    /// Builds a fresh all-deny tree without touching the memo.
    pub fn build(registry: &dyn ResourceRegistry, kinds: &[AccessKind]) -> PermissionTree {
        let mut tree = PermissionTree::new();
        for entry in registry.list_exposed_resources() {
            let Some(operations) = entry.operations else {
                tracing::debug!(resource = %entry.name, "skipping resource without operations");
                continue;
            };
            tree.insert_resource(entry.name.clone());
            for operation in operations {
                tree.insert_operation(entry.name.clone(), operation, kinds);
            }
        }
        tracing::debug!(leaves = tree.len(), "built default permission tree");
        tree
    }
}

#[cfg(all(test, feature = "memory-store"))]
mod tests {
    use super::*;
    use crate::memory_store::MemoryRegistry;
    use crate::types::{OperationName, ResourceName};

    fn registry() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry.add_resource(
            ResourceName::try_from("Order").unwrap(),
            vec![
                OperationName::try_from("cancel").unwrap(),
                OperationName::try_from("find").unwrap(),
            ],
        );
        registry.add_hidden_resource(
            ResourceName::try_from("Internal").unwrap(),
            vec![OperationName::try_from("purge").unwrap()],
        );
        registry.add_resource_without_operations(ResourceName::try_from("Broken").unwrap());
        registry
    }

    #[test]
    fn build_denies_every_leaf() {
        let tree = DefaultTree::build(&registry(), &AccessKind::ALL);
        assert_eq!(tree.len(), 8);
        assert!(tree.coordinates().all(|c| {
            tree.get(c.resource.as_str(), c.operation.as_str(), c.kind) == Some(false)
        }));
    }

    #[test]
    fn build_skips_hidden_and_malformed_resources() {
        let tree = DefaultTree::build(&registry(), &AccessKind::ALL);
        let resources: Vec<&str> = tree.resources().map(ResourceName::as_str).collect();
        assert_eq!(resources, vec!["Order"]);
    }

    #[test]
    fn get_returns_memoized_instance() {
        let registry = registry();
        let default_tree = DefaultTree::new(AccessKind::ALL.to_vec());
        let first = default_tree.get(&registry);

        registry.add_resource(
            ResourceName::try_from("Late").unwrap(),
            vec![OperationName::try_from("find").unwrap()],
        );
        let second = default_tree.get(&registry);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, DefaultTree::build(&self::registry(), &AccessKind::ALL));
    }
}
