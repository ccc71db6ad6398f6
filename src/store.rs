use crate::error::StoreError;
use crate::rule::{Rule, Selector};
use crate::types::{AccessKind, OperationName, ResourceName};
use async_trait::async_trait;

/// Registry listing for one resource.
///
/// `operations` is `None` when the registry holds no operation list for the
/// resource; such entries are skipped when shaping trees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: ResourceName,
    pub operations: Option<Vec<OperationName>>,
}

impl RegistryEntry {
    pub fn new(name: ResourceName, operations: Vec<OperationName>) -> Self {
        Self {
            name,
            operations: Some(operations),
        }
    }
}

/// Read-only view of the registered resources and their operations.
pub trait ResourceRegistry: Send + Sync {
    /// Returns exposed resources in a stable order.
    fn list_exposed_resources(&self) -> Vec<RegistryEntry>;
}

/// Read-only access to persisted and compiled-in rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Returns stored rules for `resource` matching the filters.
    ///
    /// Implementations follow [`Rule::matches_filter`]: a concrete operation
    /// also selects `ALL` rules, a concrete access kind also selects `ALL` and
    /// `EXECUTE` rules.
    async fn find_rules(
        &self,
        resource: &ResourceName,
        operation: &Selector<OperationName>,
        access: &Selector<AccessKind>,
    ) -> std::result::Result<Vec<Rule>, StoreError>;

    /// Returns compiled-in rules for the resource/operation pair.
    fn static_rules_for(
        &self,
        _resource: &ResourceName,
        _operation: &Selector<OperationName>,
    ) -> Vec<Rule> {
        Vec::new()
    }
}

impl<T: ResourceRegistry + ?Sized> ResourceRegistry for std::sync::Arc<T> {
    fn list_exposed_resources(&self) -> Vec<RegistryEntry> {
        (**self).list_exposed_resources()
    }
}

#[async_trait]
impl<T: RuleStore + ?Sized> RuleStore for std::sync::Arc<T> {
    async fn find_rules(
        &self,
        resource: &ResourceName,
        operation: &Selector<OperationName>,
        access: &Selector<AccessKind>,
    ) -> std::result::Result<Vec<Rule>, StoreError> {
        (**self).find_rules(resource, operation, access).await
    }

    fn static_rules_for(
        &self,
        resource: &ResourceName,
        operation: &Selector<OperationName>,
    ) -> Vec<Rule> {
        (**self).static_rules_for(resource, operation)
    }
}
