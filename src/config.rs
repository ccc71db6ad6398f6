//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```
//! use rs_acl_tree::Config;
//! let config = Config::from_json_str(r#"{"enableCache": false}"#).unwrap();
//! assert!(!config.enable_cache);
//! assert_eq!(config.cache.ttl_secs, 24 * 60 * 60);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::AccessKind;

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Toggles durable persistence of cached trees.
    pub enable_cache: bool,
    pub models: ModelBindings,
    pub cache: CacheConfig,
    /// Route path used by the HTTP integration.
    pub mount_path: String,
    /// Access kinds present in every tree.
    pub access_kinds: Vec<AccessKind>,
    pub role_merge: RoleMergePolicy,
    pub stale_trees: StaleTreePolicy,
    pub writeback_failure: WritebackPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_cache: true,
            models: ModelBindings::default(),
            cache: CacheConfig::default(),
            mount_path: "/getUserPermissionTree".to_string(),
            access_kinds: AccessKind::ALL.to_vec(),
            role_merge: RoleMergePolicy::default(),
            stale_trees: StaleTreePolicy::default(),
            writeback_failure: WritebackPolicy::default(),
        }
    }
}

impl Config {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_kinds.is_empty() {
            return Err(Error::Config("accessKinds must not be empty".to_string()));
        }
        if !self.mount_path.starts_with('/') {
            return Err(Error::Config("mountPath must start with '/'".to_string()));
        }
        self.cache.validate()
    }

    /// Access kinds with duplicates removed, in declaration order.
    pub fn access_kinds(&self) -> Vec<AccessKind> {
        let mut kinds = Vec::with_capacity(self.access_kinds.len());
        for kind in &self.access_kinds {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

/// Names of the collaborator model bindings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelBindings {
    pub role_mapping_model_name: String,
    pub acl_model_name: String,
}

impl Default for ModelBindings {
    fn default() -> Self {
        Self {
            role_mapping_model_name: "RoleMapping".to_string(),
            acl_model_name: "ACL".to_string(),
        }
    }
}

/// Durable cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Snapshot time-to-live in seconds; `0` disables expiry.
    pub ttl_secs: u64,
    /// Largest snapshot written to disk, in bytes.
    pub max_size_bytes: u64,
    /// Directory holding the snapshot file.
    pub path: PathBuf,
    /// Fixed key the snapshot is stored under.
    pub key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            max_size_bytes: 1000 * 1000 * 1000,
            path: PathBuf::from("diskcache"),
            key: "userPermissionTrees".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    fn validate(&self) -> Result<()> {
        validate_cache_key(&self.key)?;
        if self.max_size_bytes == 0 {
            return Err(Error::Config("cache.maxSizeBytes must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Checks that a snapshot key is safe to use as a file name.
pub(crate) fn validate_cache_key(key: &str) -> Result<()> {
    let key_ok = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'));
    if !key_ok {
        return Err(Error::Config(
            "cache.key must be non-empty and contain only [A-Za-z0-9_-]".to_string(),
        ));
    }
    Ok(())
}

/// How decisions from several roles combine at one coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleMergePolicy {
    /// The last role in caller order wins.
    #[default]
    LastWriterWins,
    /// Allowed if any role allows.
    MostPermissive,
    /// Allowed only if every role allows.
    MostRestrictive,
}

impl RoleMergePolicy {
    /// Combines `incoming` into `current`; `first` marks the first role's result.
    pub fn merge(self, current: bool, incoming: bool, first: bool) -> bool {
        if first {
            return incoming;
        }
        match self {
            RoleMergePolicy::LastWriterWins => incoming,
            RoleMergePolicy::MostPermissive => current || incoming,
            RoleMergePolicy::MostRestrictive => current && incoming,
        }
    }
}

/// What to do with a cached tree whose shape no longer matches the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleTreePolicy {
    /// Keep serving the cached tree as is.
    #[default]
    Serve,
    /// Treat it as a miss and rebuild.
    Rebuild,
}

/// Handling of durable write failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritebackPolicy {
    /// Surface the error to the caller.
    #[default]
    Fail,
    /// Log a warning and keep the in-memory commit.
    Warn,
}
