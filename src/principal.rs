use crate::error::{Error, Result};
use crate::types::{AppId, RoleName, UserId};
use serde::Deserialize;

/// Requester identity evaluated against rules.
///
/// A `Principal` always carries a canonical [`UserId`]; raw caller input goes
/// through [`PrincipalRecord`] first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    user_id: UserId,
    app_id: Option<AppId>,
    roles: Vec<RoleName>,
}

impl Principal {
    /// Creates a principal with no app and no roles.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            app_id: None,
            roles: Vec::new(),
        }
    }

    /// Sets the application id.
    pub fn with_app(mut self, app_id: AppId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    /// Appends a role. Role order is the merge order used when building trees.
    pub fn with_role(mut self, role: RoleName) -> Self {
        self.roles.push(role);
        self
    }

    /// Appends several roles in order.
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleName>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn app_id(&self) -> Option<&AppId> {
        self.app_id.as_ref()
    }

    pub fn roles(&self) -> &[RoleName] {
        &self.roles
    }

    pub(crate) fn holds_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.as_str() == name)
    }

    /// Same user and app, restricted to a single role.
    pub(crate) fn scoped_to_role(&self, role: &RoleName) -> Self {
        Self {
            user_id: self.user_id.clone(),
            app_id: self.app_id.clone(),
            roles: vec![role.clone()],
        }
    }
}

/// Identifier as supplied by a role-membership backend: numeric or text.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Numeric(u64),
    Text(String),
}

impl RawId {
    fn as_numeric(&self) -> Option<u64> {
        match self {
            RawId::Numeric(value) => Some(*value),
            RawId::Text(text) => text.trim().parse().ok(),
        }
    }

    fn into_text(self) -> String {
        match self {
            RawId::Numeric(value) => value.to_string(),
            RawId::Text(text) => text,
        }
    }
}

/// Role reference in the `{ "name": ... }` shape.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RoleRef {
    pub name: String,
}

/// Raw principal as handed over by the role-membership collaborator.
///
/// `id` is used when it is numeric; otherwise `userId` is the identifier.
/// Conversion happens once in [`PrincipalRecord::into_principal`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalRecord {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<RawId>,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
}

impl PrincipalRecord {
    /// Resolves the canonical principal.
    ///
    /// Fails with [`Error::InvalidPrincipal`] when neither a numeric `id` nor a
    /// usable `userId` is present.
    pub fn into_principal(self) -> Result<Principal> {
        let user_id = match self.id.as_ref().and_then(RawId::as_numeric) {
            Some(numeric) => UserId::from_numeric(numeric),
            None => match self.user_id.as_deref().map(str::trim) {
                Some(text) if !text.is_empty() => UserId::new(text)
                    .map_err(|err| Error::InvalidPrincipal(err.to_string()))?,
                _ => {
                    return Err(Error::InvalidPrincipal(
                        "principal has neither a numeric id nor a user id".to_string(),
                    ));
                }
            },
        };

        let app_id = self
            .app_id
            .map(|raw| AppId::new(raw.into_text()))
            .transpose()?;
        let roles = self
            .roles
            .into_iter()
            .map(|role| RoleName::new(role.name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Principal {
            user_id,
            app_id,
            roles,
        })
    }
}

impl TryFrom<PrincipalRecord> for Principal {
    type Error = Error;

    fn try_from(record: PrincipalRecord) -> Result<Self> {
        record.into_principal()
    }
}
