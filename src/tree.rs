use crate::error::{Error, Result};
use crate::types::{AccessKind, OperationName, ResourceName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Access-kind leaves of one operation.
pub type AccessMap = BTreeMap<AccessKind, bool>;

/// One leaf position in a [`PermissionTree`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Coordinate {
    pub resource: ResourceName,
    pub operation: OperationName,
    pub kind: AccessKind,
}

impl Coordinate {
    pub fn new(resource: ResourceName, operation: OperationName, kind: AccessKind) -> Self {
        Self {
            resource,
            operation,
            kind,
        }
    }
}

/// Set of coordinates a tree covers, ignoring leaf values.
pub type TreeShape = BTreeSet<Coordinate>;

/// Resolved access matrix: resource -> operation -> access kind -> allowed.
///
/// Serializes as plain nested JSON objects, e.g.
/// `{"Order":{"cancel":{"READ":false,"WRITE":false,"EXECUTE":false}}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionTree(BTreeMap<ResourceName, BTreeMap<OperationName, AccessMap>>);

impl PermissionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource with no operations (no-op if present).
    pub fn insert_resource(&mut self, resource: ResourceName) {
        self.0.entry(resource).or_default();
    }

    /// Adds an operation with every given kind denied.
    pub fn insert_operation(
        &mut self,
        resource: ResourceName,
        operation: OperationName,
        kinds: &[AccessKind],
    ) {
        let access = self.0.entry(resource).or_default().entry(operation).or_default();
        for kind in kinds {
            access.entry(*kind).or_insert(false);
        }
    }

    /// Returns the leaf value, or `None` when the coordinate is outside the shape.
    pub fn get(&self, resource: &str, operation: &str, kind: AccessKind) -> Option<bool> {
        self.0
            .get(resource)?
            .get(operation)?
            .get(&kind)
            .copied()
    }

    /// Overwrites an existing leaf. The shape never grows through `set`.
    pub fn set(&mut self, coordinate: &Coordinate, allow: bool) -> Result<()> {
        let leaf = self
            .0
            .get_mut(coordinate.resource.as_str())
            .and_then(|operations| operations.get_mut(coordinate.operation.as_str()))
            .and_then(|access| access.get_mut(&coordinate.kind))
            .ok_or_else(|| Error::UnknownCoordinate {
                resource: coordinate.resource.clone(),
                operation: coordinate.operation.clone(),
                kind: coordinate.kind,
            })?;
        *leaf = allow;
        Ok(())
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceName> {
        self.0.keys()
    }

    pub fn operations(
        &self,
        resource: &str,
    ) -> Option<&BTreeMap<OperationName, AccessMap>> {
        self.0.get(resource)
    }

    /// Every leaf coordinate in deterministic order.
    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.0.iter().flat_map(|(resource, operations)| {
            operations.iter().flat_map(move |(operation, access)| {
                access
                    .keys()
                    .map(move |kind| Coordinate::new(resource.clone(), operation.clone(), *kind))
            })
        })
    }

    pub fn shape(&self) -> TreeShape {
        self.coordinates().collect()
    }

    pub fn same_shape(&self, other: &PermissionTree) -> bool {
        self.coordinates().eq(other.coordinates())
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.0
            .values()
            .flat_map(|operations| operations.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_tree() -> PermissionTree {
        let mut tree = PermissionTree::new();
        tree.insert_operation(
            ResourceName::try_from("Order").unwrap(),
            OperationName::try_from("cancel").unwrap(),
            &[AccessKind::Read, AccessKind::Write, AccessKind::Execute],
        );
        tree
    }

    fn cancel(kind: AccessKind) -> Coordinate {
        Coordinate::new(
            ResourceName::try_from("Order").unwrap(),
            OperationName::try_from("cancel").unwrap(),
            kind,
        )
    }

    #[test]
    fn serializes_as_nested_objects() {
        let json = serde_json::to_value(order_tree()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Order": {"cancel": {"READ": false, "WRITE": false, "EXECUTE": false}}})
        );
    }

    #[test]
    fn set_updates_existing_leaf_only() {
        let mut tree = order_tree();
        tree.set(&cancel(AccessKind::Execute), true).unwrap();
        assert_eq!(tree.get("Order", "cancel", AccessKind::Execute), Some(true));
        assert_eq!(tree.get("Order", "cancel", AccessKind::Read), Some(false));

        let err = tree.set(&cancel(AccessKind::Replicate), true).unwrap_err();
        assert!(matches!(err, Error::UnknownCoordinate { .. }));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn shape_ignores_leaf_values() {
        let mut changed = order_tree();
        changed.set(&cancel(AccessKind::Read), true).unwrap();
        assert!(changed.same_shape(&order_tree()));
        assert_eq!(changed.shape(), order_tree().shape());
        assert_ne!(changed, order_tree());
    }

    #[test]
    fn round_trips_through_json() {
        let mut tree = order_tree();
        tree.set(&cancel(AccessKind::Write), true).unwrap();
        let json = serde_json::to_string(&tree).unwrap();
        let decoded: PermissionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, tree);
    }
}
