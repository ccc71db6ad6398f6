use crate::principal::Principal;
use crate::types::{AccessKind, OperationName, ResourceName};
use std::fmt;

/// Either a concrete value or the `ALL` sentinel.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Selector<T> {
    All,
    Exact(T),
}

impl<T> Selector<T> {
    /// Maps `None` to the `ALL` sentinel.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Selector::Exact(value),
            None => Selector::All,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selector::All)
    }

    pub fn exact(&self) -> Option<&T> {
        match self {
            Selector::All => None,
            Selector::Exact(value) => Some(value),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => f.write_str("*"),
            Selector::Exact(value) => value.fmt(f),
        }
    }
}

/// Kind of principal a rule targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PrincipalType {
    User,
    App,
    Role,
}

/// Effect of a rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RulePermission {
    Allow,
    Deny,
}

/// Persisted access-control entry. Read-only to this crate.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Rule {
    pub principal_type: PrincipalType,
    pub principal_id: String,
    pub resource: ResourceName,
    pub operation: Selector<OperationName>,
    pub access: Selector<AccessKind>,
    pub permission: RulePermission,
}

impl Rule {
    /// Creates a rule covering every operation and access kind of `resource`.
    pub fn new(
        principal_type: PrincipalType,
        principal_id: impl Into<String>,
        resource: ResourceName,
        permission: RulePermission,
    ) -> Self {
        Self {
            principal_type,
            principal_id: principal_id.into(),
            resource,
            operation: Selector::All,
            access: Selector::All,
            permission,
        }
    }

    /// Narrows the rule to one operation.
    pub fn for_operation(mut self, operation: OperationName) -> Self {
        self.operation = Selector::Exact(operation);
        self
    }

    /// Narrows the rule to one access kind.
    pub fn for_access(mut self, access: AccessKind) -> Self {
        self.access = Selector::Exact(access);
        self
    }

    /// Store query contract used by [`crate::RuleStore::find_rules`].
    ///
    /// A concrete operation selects rules for that operation or `ALL`; a
    /// concrete access kind selects rules for that kind, `ALL`, or `EXECUTE`.
    pub fn matches_filter(
        &self,
        resource: &ResourceName,
        operation: &Selector<OperationName>,
        access: &Selector<AccessKind>,
    ) -> bool {
        if &self.resource != resource {
            return false;
        }
        let operation_ok = match operation {
            Selector::All => true,
            Selector::Exact(_) => self.operation.is_all() || &self.operation == operation,
        };
        let access_ok = match access {
            Selector::All => true,
            Selector::Exact(_) => {
                self.access.is_all()
                    || &self.access == access
                    || self.access == Selector::Exact(AccessKind::Execute)
            }
        };
        operation_ok && access_ok
    }

    pub(crate) fn is_relevant_to(&self, principal: &Principal) -> bool {
        match self.principal_type {
            PrincipalType::User => self.principal_id == principal.user_id().as_str(),
            PrincipalType::App => principal
                .app_id()
                .is_some_and(|app| self.principal_id == app.as_str()),
            PrincipalType::Role => principal.holds_role(&self.principal_id),
        }
    }
}

/// Resolved decision for one request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessRequest {
    pub resource: ResourceName,
    pub operation: Selector<OperationName>,
    pub access: Selector<AccessKind>,
    pub allowed: bool,
}

impl AccessRequest {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

// Field order is the precedence order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct Specificity {
    operation: u8,
    access: u8,
    principal: u8,
    permission: u8,
}

fn selector_score<T: PartialEq>(rule: &Selector<T>, requested: &Selector<T>) -> Option<u8> {
    match (rule, requested) {
        (Selector::Exact(granted), Selector::Exact(wanted)) if granted == wanted => Some(3),
        (Selector::All, Selector::All) => Some(3),
        (Selector::All, Selector::Exact(_)) => Some(2),
        (Selector::Exact(_), Selector::All) => Some(1),
        (Selector::Exact(_), Selector::Exact(_)) => None,
    }
}

pub(crate) fn specificity(
    rule: &Rule,
    operation: &Selector<OperationName>,
    access: &Selector<AccessKind>,
) -> Option<Specificity> {
    // EXECUTE rules are fetched for every concrete kind but only decide EXECUTE.
    let operation = selector_score(&rule.operation, operation)?;
    let access = selector_score(&rule.access, access)?;
    let principal = match rule.principal_type {
        PrincipalType::User => 3,
        PrincipalType::App => 2,
        PrincipalType::Role => 1,
    };
    let permission = match rule.permission {
        RulePermission::Deny => 1,
        RulePermission::Allow => 0,
    };
    Some(Specificity {
        operation,
        access,
        principal,
        permission,
    })
}

/// Applies precedence to an already relevance-filtered rule set.
///
/// No matching rule resolves to deny.
pub(crate) fn resolve_permission(
    rules: &[Rule],
    operation: &Selector<OperationName>,
    access: &Selector<AccessKind>,
) -> bool {
    let matching = rules
        .iter()
        .filter_map(|rule| specificity(rule, operation, access).map(|score| (score, rule)));

    if !operation.is_all() && !access.is_all() {
        return matching
            .max_by_key(|(score, _)| *score)
            .is_some_and(|(_, rule)| rule.permission == RulePermission::Allow);
    }

    let matching: Vec<(Specificity, &Rule)> = matching.collect();
    if let Some((_, rule)) = matching
        .iter()
        .filter(|(_, rule)| &rule.operation == operation && &rule.access == access)
        .max_by_key(|(score, _)| *score)
    {
        return rule.permission == RulePermission::Allow;
    }
    if matching
        .iter()
        .any(|(_, rule)| rule.permission == RulePermission::Deny)
    {
        return false;
    }
    matching
        .iter()
        .any(|(_, rule)| rule.permission == RulePermission::Allow)
}
