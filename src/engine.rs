use std::sync::Arc;

use futures::future::try_join_all;

use crate::cache::{NoPersistence, Persistence, TreeCache};
use crate::config::{Config, ModelBindings, RoleMergePolicy, StaleTreePolicy, WritebackPolicy};
use crate::default_tree::DefaultTree;
use crate::disk_store::DiskStore;
use crate::error::Result;
use crate::principal::Principal;
use crate::resolver::RuleResolver;
use crate::store::{ResourceRegistry, RuleStore};
use crate::tree::{Coordinate, PermissionTree};
use crate::types::{AccessKind, OperationName, ResourceName};

/// Permission tree engine: default tree, rule resolution and per-user cache.
#[derive(Debug)]
pub struct Engine<R, S, P = NoPersistence> {
    registry: R,
    resolver: RuleResolver<S>,
    default_tree: DefaultTree,
    cache: TreeCache<P>,
    role_merge: RoleMergePolicy,
    stale_trees: StaleTreePolicy,
    models: ModelBindings,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<R, S, P = NoPersistence> {
    registry: R,
    store: S,
    persistence: P,
    access_kinds: Vec<AccessKind>,
    role_merge: RoleMergePolicy,
    stale_trees: StaleTreePolicy,
    writeback: WritebackPolicy,
    models: ModelBindings,
}

impl<R, S> EngineBuilder<R, S, NoPersistence> {
    /// Creates a new builder with default configuration and no persistence.
    pub fn new(registry: R, store: S) -> Self {
        Self {
            registry,
            store,
            persistence: NoPersistence,
            access_kinds: AccessKind::ALL.to_vec(),
            role_merge: RoleMergePolicy::default(),
            stale_trees: StaleTreePolicy::default(),
            writeback: WritebackPolicy::default(),
            models: ModelBindings::default(),
        }
    }

    /// Creates a builder from `config`.
    ///
    /// Persistence is a [`DiskStore`] when `enable_cache` is set, otherwise
    /// [`NoPersistence`]. Fails with [`crate::Error::Config`] on an unusable
    /// cache key.
    pub fn from_config(
        registry: R,
        store: S,
        config: &Config,
    ) -> Result<EngineBuilder<R, S, Box<dyn Persistence>>> {
        let persistence: Box<dyn Persistence> = if config.enable_cache {
            Box::new(DiskStore::from_config(&config.cache)?)
        } else {
            Box::new(NoPersistence)
        };
        Ok(Self::new(registry, store)
            .access_kinds(config.access_kinds())
            .role_merge(config.role_merge)
            .stale_trees(config.stale_trees)
            .writeback(config.writeback_failure)
            .models(config.models.clone())
            .persistence(persistence))
    }
}

impl<R, S, P> EngineBuilder<R, S, P> {
    /// Sets the access kinds present in every tree.
    pub fn access_kinds(mut self, kinds: Vec<AccessKind>) -> Self {
        self.access_kinds = kinds;
        self
    }

    /// Sets how role results combine at one coordinate.
    pub fn role_merge(mut self, policy: RoleMergePolicy) -> Self {
        self.role_merge = policy;
        self
    }

    /// Sets how cached trees with an outdated shape are handled.
    pub fn stale_trees(mut self, policy: StaleTreePolicy) -> Self {
        self.stale_trees = policy;
        self
    }

    /// Sets how durable write failures are handled.
    pub fn writeback(mut self, policy: WritebackPolicy) -> Self {
        self.writeback = policy;
        self
    }

    /// Sets the collaborator model binding names.
    pub fn models(mut self, models: ModelBindings) -> Self {
        self.models = models;
        self
    }

    /// Sets the persistence implementation.
    pub fn persistence<P2: Persistence>(self, persistence: P2) -> EngineBuilder<R, S, P2> {
        EngineBuilder {
            registry: self.registry,
            store: self.store,
            persistence,
            access_kinds: self.access_kinds,
            role_merge: self.role_merge,
            stale_trees: self.stale_trees,
            writeback: self.writeback,
            models: self.models,
        }
    }
}

impl<R, S, P> EngineBuilder<R, S, P>
where
    P: Persistence,
{
    /// Builds the engine, hydrating the cache from persistence once.
    pub async fn build(self) -> Engine<R, S, P> {
        tracing::info!(
            role_mapping_model = %self.models.role_mapping_model_name,
            acl_model = %self.models.acl_model_name,
            access_kinds = self.access_kinds.len(),
            "starting permission tree engine"
        );
        let cache = TreeCache::open(self.persistence)
            .await
            .with_writeback_policy(self.writeback);

        Engine {
            registry: self.registry,
            resolver: RuleResolver::new(self.store),
            default_tree: DefaultTree::new(self.access_kinds),
            cache,
            role_merge: self.role_merge,
            stale_trees: self.stale_trees,
            models: self.models,
        }
    }
}

impl<R, S, P> Engine<R, S, P>
where
    R: ResourceRegistry,
    S: RuleStore,
    P: Persistence,
{
    /// Returns the user's tree, building and caching it on first access.
    ///
    /// Concurrent calls for an uncached user share one build.
    pub async fn get_permissions_for_user(
        &self,
        principal: &Principal,
    ) -> Result<Arc<PermissionTree>> {
        let default_tree = self.default_tree();
        let stale_trees = self.stale_trees;
        let accept = |tree: &PermissionTree| match stale_trees {
            StaleTreePolicy::Serve => true,
            StaleTreePolicy::Rebuild => {
                let current = tree.same_shape(&default_tree);
                if !current {
                    tracing::info!(user = %principal.user_id(), "cached permission tree is stale; rebuilding");
                }
                current
            }
        };

        self.cache
            .get_or_build(principal.user_id(), accept, || {
                self.build_tree(principal, &default_tree)
            })
            .await
    }

    /// Returns one leaf of the user's tree.
    ///
    /// Fails with [`crate::Error::UnknownCoordinate`] outside the tree shape.
    pub async fn get_permission(
        &self,
        principal: &Principal,
        resource: &ResourceName,
        operation: &OperationName,
        kind: AccessKind,
    ) -> Result<bool> {
        let tree = self.get_permissions_for_user(principal).await?;
        tree.get(resource.as_str(), operation.as_str(), kind)
            .ok_or_else(|| crate::Error::UnknownCoordinate {
                resource: resource.clone(),
                operation: operation.clone(),
                kind,
            })
    }

    /// Overwrites one leaf of the user's tree and persists the whole tree.
    ///
    /// Only this user's tree changes; the default tree and other users'
    /// trees are never touched.
    pub async fn set_permission(
        &self,
        principal: &Principal,
        resource: &ResourceName,
        operation: &OperationName,
        kind: AccessKind,
        allow: bool,
    ) -> Result<()> {
        self.get_permissions_for_user(principal).await?;
        let coordinate = Coordinate::new(resource.clone(), operation.clone(), kind);
        self.cache
            .update(principal.user_id(), |tree| tree.set(&coordinate, allow))
            .await?;
        Ok(())
    }

    /// Returns the memoized all-deny template tree.
    pub fn default_tree(&self) -> Arc<PermissionTree> {
        self.default_tree.get(&self.registry)
    }

    async fn build_tree(
        &self,
        principal: &Principal,
        default_tree: &PermissionTree,
    ) -> Result<PermissionTree> {
        let coordinates: Vec<Coordinate> = default_tree.coordinates().collect();
        tracing::debug!(
            user = %principal.user_id(),
            roles = principal.roles().len(),
            coordinates = coordinates.len(),
            "building permission tree"
        );

        let sweeps = principal.roles().iter().map(|role| {
            let scoped = principal.scoped_to_role(role);
            let coordinates = &coordinates;
            async move {
                try_join_all(
                    coordinates
                        .iter()
                        .map(|coordinate| self.resolver.resolve_coordinate(&scoped, coordinate)),
                )
                .await
            }
        });
        let per_role = try_join_all(sweeps).await.inspect_err(|err| {
            tracing::warn!(user = %principal.user_id(), error = %err, "permission tree build failed");
        })?;

        let mut tree = default_tree.clone();
        for (index, requests) in per_role.into_iter().enumerate() {
            for (coordinate, request) in coordinates.iter().zip(requests) {
                let current = tree
                    .get(
                        coordinate.resource.as_str(),
                        coordinate.operation.as_str(),
                        coordinate.kind,
                    )
                    .unwrap_or(false);
                let merged = self
                    .role_merge
                    .merge(current, request.is_allowed(), index == 0);
                tree.set(coordinate, merged)?;
            }
        }

        tracing::debug!(user = %principal.user_id(), "built permission tree");
        Ok(tree)
    }
}

impl<R, S, P> Engine<R, S, P> {
    /// Number of users with a cached tree.
    pub fn cached_users(&self) -> usize {
        self.cache.len()
    }

    /// Underlying tree cache.
    pub fn cache(&self) -> &TreeCache<P> {
        &self.cache
    }

    pub fn resolver(&self) -> &RuleResolver<S> {
        &self.resolver
    }

    pub fn models(&self) -> &ModelBindings {
        &self.models
    }
}
