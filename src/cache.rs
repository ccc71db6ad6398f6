use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::WritebackPolicy;
use crate::error::{Error, Result};
use crate::tree::PermissionTree;
use crate::types::UserId;

/// Durable mirror of the cached trees.
///
/// The whole `user -> tree` mapping is written on every commit and read once
/// when the cache opens.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Reads the persisted mapping; `None` means no prior state.
    async fn load(&self) -> Result<Option<HashMap<UserId, PermissionTree>>>;

    /// Replaces the persisted mapping.
    async fn store(&self, trees: &HashMap<UserId, Arc<PermissionTree>>) -> Result<()>;
}

/// No-op persistence; trees live for the process lifetime only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

#[async_trait]
impl Persistence for NoPersistence {
    async fn load(&self) -> Result<Option<HashMap<UserId, PermissionTree>>> {
        Ok(None)
    }

    async fn store(&self, _trees: &HashMap<UserId, Arc<PermissionTree>>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<P: Persistence + ?Sized> Persistence for Box<P> {
    async fn load(&self) -> Result<Option<HashMap<UserId, PermissionTree>>> {
        (**self).load().await
    }

    async fn store(&self, trees: &HashMap<UserId, Arc<PermissionTree>>) -> Result<()> {
        (**self).store(trees).await
    }
}

/// Per-user permission trees with write-through persistence.
///
/// Builds for one user are serialized behind a per-user lock, so concurrent
/// misses for the same user run a single build and share its result. Builds
/// for different users never wait on each other. Durable writes are
/// serialized across all users because the snapshot is a single key.
pub struct TreeCache<P = NoPersistence> {
    trees: RwLock<HashMap<UserId, Arc<PermissionTree>>>,
    builds: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
    writes: AsyncMutex<()>,
    persistence: P,
    writeback: WritebackPolicy,
}

impl<P> std::fmt::Debug for TreeCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCache")
            .field("users", &self.len())
            .field("writeback", &self.writeback)
            .finish()
    }
}

impl<P> TreeCache<P> {
    /// Returns whether a tree is cached for the user.
    pub fn has(&self, user: &UserId) -> bool {
        let guard = self.trees.read().expect("poisoned lock");
        guard.contains_key(user)
    }

    /// Returns the cached tree or [`Error::NotFound`].
    pub fn get(&self, user: &UserId) -> Result<Arc<PermissionTree>> {
        let guard = self.trees.read().expect("poisoned lock");
        guard
            .get(user)
            .cloned()
            .ok_or_else(|| Error::NotFound(user.clone()))
    }

    /// Number of cached users.
    pub fn len(&self) -> usize {
        let guard = self.trees.read().expect("poisoned lock");
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(
        &self,
        user: &UserId,
        accept: &impl Fn(&PermissionTree) -> bool,
    ) -> Option<Arc<PermissionTree>> {
        let guard = self.trees.read().expect("poisoned lock");
        guard.get(user).filter(|tree| accept(tree)).cloned()
    }

    fn build_lock(&self, user: &UserId) -> Arc<AsyncMutex<()>> {
        let mut guard = self.builds.lock().expect("poisoned lock");
        guard.entry(user.clone()).or_default().clone()
    }

    // Drops the table entry once no other caller holds or waits on it.
    fn release_build_lock(&self, user: &UserId, lock: &Arc<AsyncMutex<()>>) {
        let mut guard = self.builds.lock().expect("poisoned lock");
        let owned = guard.get(user).is_some_and(|held| Arc::ptr_eq(held, lock));
        if owned && Arc::strong_count(lock) == 2 {
            guard.remove(user);
        }
    }

    #[cfg(test)]
    fn pending_builds(&self) -> usize {
        let guard = self.builds.lock().expect("poisoned lock");
        guard.len()
    }
}

impl<P> TreeCache<P>
where
    P: Persistence,
{
    /// Opens the cache and hydrates it from `persistence`.
    ///
    /// A failed read is logged and the cache starts empty.
    pub async fn open(persistence: P) -> Self {
        let loaded = match persistence.load().await {
            Ok(Some(trees)) => {
                tracing::info!(users = trees.len(), "hydrated permission trees");
                trees
                    .into_iter()
                    .map(|(user, tree)| (user, Arc::new(tree)))
                    .collect()
            }
            Ok(None) => HashMap::new(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load permission trees; starting empty");
                HashMap::new()
            }
        };

        Self {
            trees: RwLock::new(loaded),
            builds: Mutex::new(HashMap::new()),
            writes: AsyncMutex::new(()),
            persistence,
            writeback: WritebackPolicy::default(),
        }
    }

    /// Sets how durable write failures are handled.
    pub fn with_writeback_policy(mut self, policy: WritebackPolicy) -> Self {
        self.writeback = policy;
        self
    }

    /// Replaces the user's tree and writes the full mapping through.
    ///
    /// The in-memory entry is replaced even when the durable write fails.
    pub async fn set(&self, user: &UserId, tree: PermissionTree) -> Result<Arc<PermissionTree>> {
        let tree = Arc::new(tree);
        let _write = self.writes.lock().await;
        let snapshot = {
            let mut guard = self.trees.write().expect("poisoned lock");
            guard.insert(user.clone(), Arc::clone(&tree));
            guard.clone()
        };

        match self.persistence.store(&snapshot).await {
            Ok(()) => Ok(tree),
            Err(err) => match self.writeback {
                WritebackPolicy::Fail => {
                    tracing::error!(user = %user, error = %err, "permission tree writeback failed");
                    Err(err)
                }
                WritebackPolicy::Warn => {
                    tracing::warn!(user = %user, error = %err, "permission tree writeback failed; keeping in-memory tree");
                    Ok(tree)
                }
            },
        }
    }

    /// Returns the cached tree when `accept` approves it, otherwise runs
    /// `build` and commits the result.
    ///
    /// At most one `build` per user runs at a time; callers that queued
    /// behind it return the tree it committed. A failed build commits nothing.
    pub async fn get_or_build<A, F, Fut>(
        &self,
        user: &UserId,
        accept: A,
        build: F,
    ) -> Result<Arc<PermissionTree>>
    where
        A: Fn(&PermissionTree) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PermissionTree>>,
    {
        if let Some(tree) = self.lookup(user, &accept) {
            return Ok(tree);
        }

        let lock = self.build_lock(user);
        let result: Result<Arc<PermissionTree>> = async {
            let _guard = lock.lock().await;
            if let Some(tree) = self.lookup(user, &accept) {
                tracing::debug!(user = %user, "reusing tree committed by concurrent build");
                return Ok(tree);
            }
            let tree = build().await?;
            self.set(user, tree).await
        }
        .await;
        self.release_build_lock(user, &lock);
        result
    }

    /// Applies `apply` to a copy of the user's tree and commits the copy.
    ///
    /// Serialized with builds for the same user. Fails with
    /// [`Error::NotFound`] when no tree is cached.
    pub async fn update<F>(&self, user: &UserId, apply: F) -> Result<Arc<PermissionTree>>
    where
        F: FnOnce(&mut PermissionTree) -> Result<()>,
    {
        let lock = self.build_lock(user);
        let result: Result<Arc<PermissionTree>> = async {
            let _guard = lock.lock().await;
            let mut tree = PermissionTree::clone(&*self.get(user)?);
            apply(&mut tree)?;
            self.set(user, tree).await
        }
        .await;
        self.release_build_lock(user, &lock);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Coordinate;
    use crate::types::{AccessKind, OperationName, ResourceName};
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingPersistence {
        preload: Option<HashMap<UserId, PermissionTree>>,
        fail_load: bool,
        fail_store: bool,
        stores: AtomicUsize,
        last: Mutex<Option<HashMap<UserId, PermissionTree>>>,
    }

    #[async_trait]
    impl Persistence for RecordingPersistence {
        async fn load(&self) -> Result<Option<HashMap<UserId, PermissionTree>>> {
            if self.fail_load {
                return Err(Error::cache_io(
                    "reading snapshot",
                    std::io::Error::other("disk gone"),
                ));
            }
            Ok(self.preload.clone())
        }

        async fn store(&self, trees: &HashMap<UserId, Arc<PermissionTree>>) -> Result<()> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            if self.fail_store {
                return Err(Error::cache_io(
                    "writing snapshot",
                    std::io::Error::other("disk full"),
                ));
            }
            let copy = trees
                .iter()
                .map(|(user, tree)| (user.clone(), PermissionTree::clone(tree)))
                .collect();
            *self.last.lock().unwrap() = Some(copy);
            Ok(())
        }
    }

    fn user(id: u64) -> UserId {
        UserId::from_numeric(id)
    }

    fn tree() -> PermissionTree {
        let mut tree = PermissionTree::new();
        tree.insert_operation(
            ResourceName::try_from("Order").unwrap(),
            OperationName::try_from("cancel").unwrap(),
            &[AccessKind::Read],
        );
        tree
    }

    fn read_cancel() -> Coordinate {
        Coordinate::new(
            ResourceName::try_from("Order").unwrap(),
            OperationName::try_from("cancel").unwrap(),
            AccessKind::Read,
        )
    }

    #[test]
    fn get_missing_user_is_not_found() {
        let cache = block_on(TreeCache::open(NoPersistence));
        assert!(!cache.has(&user(1)));
        assert!(matches!(cache.get(&user(1)), Err(Error::NotFound(_))));
    }

    #[test]
    fn set_writes_full_mapping_through() {
        let cache = block_on(TreeCache::open(RecordingPersistence::default()));
        block_on(cache.set(&user(1), tree())).unwrap();
        block_on(cache.set(&user(2), tree())).unwrap();

        assert!(cache.has(&user(1)));
        assert_eq!(cache.persistence.stores.load(Ordering::SeqCst), 2);
        let last = cache.persistence.last.lock().unwrap().clone().unwrap();
        assert_eq!(last.len(), 2);
    }

    #[test]
    fn open_hydrates_from_persistence() {
        let mut preload = HashMap::new();
        preload.insert(user(9), tree());
        let persistence = RecordingPersistence {
            preload: Some(preload),
            ..RecordingPersistence::default()
        };
        let cache = block_on(TreeCache::open(persistence));
        assert!(cache.has(&user(9)));
        assert_eq!(*cache.get(&user(9)).unwrap(), tree());
    }

    #[test]
    fn open_falls_back_to_empty_on_load_failure() {
        let persistence = RecordingPersistence {
            fail_load: true,
            ..RecordingPersistence::default()
        };
        let cache = block_on(TreeCache::open(persistence));
        assert!(cache.is_empty());
    }

    #[test]
    fn writeback_failure_is_surfaced_by_default() {
        let persistence = RecordingPersistence {
            fail_store: true,
            ..RecordingPersistence::default()
        };
        let cache = block_on(TreeCache::open(persistence));
        let result = block_on(cache.set(&user(1), tree()));
        assert!(matches!(result, Err(Error::CacheIo { .. })));
        assert!(cache.has(&user(1)));
    }

    #[test]
    fn writeback_failure_can_be_downgraded_to_warning() {
        let persistence = RecordingPersistence {
            fail_store: true,
            ..RecordingPersistence::default()
        };
        let cache = block_on(TreeCache::open(persistence))
            .with_writeback_policy(WritebackPolicy::Warn);
        assert!(block_on(cache.set(&user(1), tree())).is_ok());
    }

    #[test]
    fn failed_build_commits_nothing() {
        let cache = block_on(TreeCache::open(NoPersistence));
        let result = block_on(cache.get_or_build(&user(1), |_| true, || async {
            Err(Error::InvalidPrincipal("boom".to_string()))
        }));
        assert!(result.is_err());
        assert!(!cache.has(&user(1)));
        assert_eq!(cache.pending_builds(), 0);
    }

    #[test]
    fn rejected_tree_is_rebuilt() {
        let cache = block_on(TreeCache::open(NoPersistence));
        block_on(cache.set(&user(1), PermissionTree::new())).unwrap();

        let rebuilt = block_on(cache.get_or_build(&user(1), |tree| !tree.is_empty(), || async {
            Ok(tree())
        }))
        .unwrap();
        assert_eq!(*rebuilt, tree());
    }

    #[test]
    fn update_copies_before_mutating() {
        let cache = block_on(TreeCache::open(NoPersistence));
        let before = block_on(cache.set(&user(1), tree())).unwrap();
        let after = block_on(cache.update(&user(1), |tree| tree.set(&read_cancel(), true))).unwrap();

        assert_eq!(before.get("Order", "cancel", AccessKind::Read), Some(false));
        assert_eq!(after.get("Order", "cancel", AccessKind::Read), Some(true));
        assert!(matches!(
            block_on(cache.update(&user(2), |_| Ok(()))),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_build() {
        let cache = Arc::new(TreeCache::open(NoPersistence).await);
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(&user(1), |_| true, || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(tree())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut trees = Vec::new();
        for handle in handles {
            trees.push(handle.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(trees.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(cache.pending_builds(), 0);
    }

    #[test]
    fn build_locks_are_released_after_use() {
        let cache = block_on(TreeCache::open(NoPersistence));
        for id in 0..16 {
            block_on(cache.get_or_build(&user(id), |_| true, || async { Ok(tree()) })).unwrap();
        }
        block_on(cache.update(&user(3), |tree| tree.set(&read_cancel(), true))).unwrap();
        let _ = block_on(cache.update(&user(99), |_| Ok(())));

        assert_eq!(cache.len(), 16);
        assert_eq!(cache.pending_builds(), 0);
    }
}
