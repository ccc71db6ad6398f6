use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::rule::{Rule, Selector};
use crate::store::{RegistryEntry, ResourceRegistry, RuleStore};
use crate::types::{AccessKind, OperationName, ResourceName};

/// In-memory resource registry for tests and demos.
///
/// Resources are listed in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    inner: Arc<RwLock<Vec<Registered>>>,
}

#[derive(Debug, Clone)]
struct Registered {
    entry: RegistryEntry,
    exposed: bool,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exposed resource with its operations.
    pub fn add_resource(&self, name: ResourceName, operations: Vec<OperationName>) {
        self.push(RegistryEntry::new(name, operations), true);
    }

    /// Registers a resource that is not exposed; it never appears in trees.
    pub fn add_hidden_resource(&self, name: ResourceName, operations: Vec<OperationName>) {
        self.push(RegistryEntry::new(name, operations), false);
    }

    /// Registers an exposed resource without an operation list.
    pub fn add_resource_without_operations(&self, name: ResourceName) {
        self.push(
            RegistryEntry {
                name,
                operations: None,
            },
            true,
        );
    }

    fn push(&self, entry: RegistryEntry, exposed: bool) {
        let mut guard = self.inner.write().expect("poisoned lock");
        guard.retain(|existing| existing.entry.name != entry.name);
        guard.push(Registered { entry, exposed });
    }
}

impl ResourceRegistry for MemoryRegistry {
    fn list_exposed_resources(&self) -> Vec<RegistryEntry> {
        let guard = self.inner.read().expect("poisoned lock");
        guard
            .iter()
            .filter(|registered| registered.exposed)
            .map(|registered| registered.entry.clone())
            .collect()
    }
}

/// In-memory rule store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryRuleStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: RwLock<Vec<Rule>>,
    static_rules: RwLock<Vec<Rule>>,
}

impl MemoryRuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dynamically stored rule.
    pub fn add_rule(&self, rule: Rule) {
        let mut guard = self.inner.rules.write().expect("poisoned lock");
        guard.push(rule);
    }

    /// Adds a compiled-in rule.
    pub fn add_static_rule(&self, rule: Rule) {
        let mut guard = self.inner.static_rules.write().expect("poisoned lock");
        guard.push(rule);
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn find_rules(
        &self,
        resource: &ResourceName,
        operation: &Selector<OperationName>,
        access: &Selector<AccessKind>,
    ) -> std::result::Result<Vec<Rule>, crate::StoreError> {
        let guard = self.inner.rules.read().expect("poisoned lock");
        Ok(guard
            .iter()
            .filter(|rule| rule.matches_filter(resource, operation, access))
            .cloned()
            .collect())
    }

    fn static_rules_for(
        &self,
        resource: &ResourceName,
        operation: &Selector<OperationName>,
    ) -> Vec<Rule> {
        let guard = self.inner.static_rules.read().expect("poisoned lock");
        guard
            .iter()
            .filter(|rule| rule.matches_filter(resource, operation, &Selector::All))
            .cloned()
            .collect()
    }
}
