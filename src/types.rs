use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 128;

fn validate_simple_name(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::InvalidId(format!(
            "{kind} length must be <= {MAX_NAME_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_name_char) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

// Remote method names carry `.` and `$` (`prototype.patchAttributes`, `__get__$orders`).
fn is_allowed_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-' | '.' | '$' | '@')
}

macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_simple_name(value.as_ref(), $kind).map(Self)
            }

            /// Creates an identifier from a trusted string without validation.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from_string(value)
            }
        }
    };
}

define_id_type!(
    /// Canonical user identifier used as the cache key.
    UserId,
    "user id"
);
define_id_type!(
    /// Application identifier.
    AppId,
    "app id"
);
define_id_type!(
    /// Role (or group) name.
    RoleName,
    "role name"
);
define_id_type!(
    /// Name of an access-controlled resource.
    ResourceName,
    "resource name"
);
define_id_type!(
    /// Name of an operation exposed by a resource.
    OperationName,
    "operation name"
);

impl UserId {
    /// Creates a user id from a numeric identifier.
    ///
    /// The decimal rendering is the canonical form, so `42` and `"42"` map to
    /// the same cache key.
    pub fn from_numeric(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Category of access checked for every operation.
///
/// This is a closed set; trees are shaped over a subset of it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessKind {
    Read,
    Replicate,
    Write,
    Execute,
}

impl AccessKind {
    /// Every access kind, in tree order.
    pub const ALL: [AccessKind; 4] = [
        AccessKind::Read,
        AccessKind::Replicate,
        AccessKind::Write,
        AccessKind::Execute,
    ];

    /// Returns the wire name (`READ`, `WRITE`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Read => "READ",
            AccessKind::Replicate => "REPLICATE",
            AccessKind::Write => "WRITE",
            AccessKind::Execute => "EXECUTE",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "READ" => Ok(AccessKind::Read),
            "REPLICATE" => Ok(AccessKind::Replicate),
            "WRITE" => Ok(AccessKind::Write),
            "EXECUTE" => Ok(AccessKind::Execute),
            other => Err(Error::InvalidId(format!("unknown access kind {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_from_numeric_matches_string_form() {
        let numeric = UserId::from_numeric(42);
        let text = UserId::try_from("42").unwrap();
        assert_eq!(numeric, text);
    }

    #[test]
    fn operation_name_accepts_remote_method_names() {
        let op = OperationName::try_from("prototype.patchAttributes").expect("operation");
        assert_eq!(op.as_str(), "prototype.patchAttributes");
    }

    #[test]
    fn resource_name_rejects_empty() {
        let err = ResourceName::try_from("   ").expect_err("must reject");
        assert!(err.to_string().contains("resource name"));
    }

    #[test]
    fn role_name_rejects_invalid_chars() {
        let err = RoleName::try_from("ad min").expect_err("must reject");
        assert!(err.to_string().contains("role name"));
    }

    #[test]
    fn access_kind_parses_case_insensitively() {
        assert_eq!("execute".parse::<AccessKind>().unwrap(), AccessKind::Execute);
        assert!("DELETE".parse::<AccessKind>().is_err());
    }

    #[test]
    fn access_kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&AccessKind::Replicate).unwrap();
        assert_eq!(json, "\"REPLICATE\"");
    }
}
