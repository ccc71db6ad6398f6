//! File-backed persistence for cached permission trees.
//!
//! The snapshot lives in a single JSON file named after the configured key:
//!
//! ```text
//! diskcache/
//! └── userPermissionTrees.json   {"writtenAt": 1760000000, "trees": {"42": {...}}}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::cache::Persistence;
use crate::config::{CacheConfig, validate_cache_key};
use crate::error::{Error, Result};
use crate::tree::PermissionTree;
use crate::types::UserId;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotOut<'a> {
    written_at: u64,
    trees: &'a HashMap<UserId, Arc<PermissionTree>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotIn {
    written_at: u64,
    trees: HashMap<UserId, PermissionTree>,
}

/// JSON snapshot store with time-to-live and size limit.
///
/// Writes go to a hidden temporary sibling and are renamed over the snapshot,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    key: String,
    ttl: Option<Duration>,
    max_size_bytes: u64,
}

impl DiskStore {
    /// Creates a store writing `<dir>/<key>.json`.
    ///
    /// Fails with [`Error::Config`] unless `key` is non-empty `[A-Za-z0-9_-]`.
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_cache_key(&key)?;
        let defaults = CacheConfig::default();
        Ok(Self {
            dir: dir.into(),
            key,
            ttl: defaults.ttl(),
            max_size_bytes: defaults.max_size_bytes,
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self::new(config.path.clone(), config.key.clone())?
            .with_ttl(config.ttl())
            .with_max_size(config.max_size_bytes))
    }

    /// Sets the snapshot time-to-live; `None` disables expiry.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.key))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.json.tmp", self.key))
    }

    fn is_expired(&self, written_at: u64, now: u64) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_sub(written_at) > ttl.as_secs())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl Persistence for DiskStore {
    async fn load(&self) -> Result<Option<HashMap<UserId, PermissionTree>>> {
        let path = self.snapshot_path();
        let json = match fs::read(&path).await {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::cache_io("reading snapshot", err)),
        };

        let snapshot: SnapshotIn = serde_json::from_slice(&json)?;
        if self.is_expired(snapshot.written_at, unix_now()) {
            tracing::info!(path = %path.display(), "permission tree snapshot expired");
            return Ok(None);
        }
        Ok(Some(snapshot.trees))
    }

    async fn store(&self, trees: &HashMap<UserId, Arc<PermissionTree>>) -> Result<()> {
        let json = serde_json::to_vec(&SnapshotOut {
            written_at: unix_now(),
            trees,
        })?;
        let size = json.len() as u64;
        if size > self.max_size_bytes {
            return Err(Error::CacheCapacity {
                size,
                max: self.max_size_bytes,
            });
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| Error::cache_io("creating cache directory", err))?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, &json)
            .await
            .map_err(|err| Error::cache_io("writing snapshot", err))?;
        fs::rename(&temp_path, self.snapshot_path())
            .await
            .map_err(|err| Error::cache_io("replacing snapshot", err))?;

        tracing::debug!(users = trees.len(), bytes = size, "persisted permission trees");
        Ok(())
    }
}
