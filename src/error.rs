use crate::types::{AccessKind, OperationName, ResourceName, UserId};
use thiserror::Error;

/// Collaborator-layer error type (rule store, registry backends).
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// No user id could be derived from the principal.
    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// The rule store failed while resolving a rule set.
    #[error("rule resolution failed for {resource}.{operation}: {source}")]
    Resolution {
        resource: ResourceName,
        operation: String,
        #[source]
        source: StoreError,
    },
    /// Durable cache read or write failed.
    #[error("cache io error while {context}: {source}")]
    CacheIo {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// Durable cache contents could not be encoded or decoded.
    #[error("cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),
    /// Serialized snapshot exceeds the configured size limit.
    #[error("cache snapshot of {size} bytes exceeds max size {max}")]
    CacheCapacity { size: u64, max: u64 },
    /// No tree is cached for the user.
    #[error("no permission tree cached for user {0}")]
    NotFound(UserId),
    /// The coordinate is not part of the tree shape.
    #[error("unknown permission coordinate {resource}.{operation}.{kind}")]
    UnknownCoordinate {
        resource: ResourceName,
        operation: OperationName,
        kind: AccessKind,
    },
    /// Invalid configuration input.
    #[error("invalid config: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn cache_io(context: &'static str, source: std::io::Error) -> Self {
        Self::CacheIo { context, source }
    }
}
