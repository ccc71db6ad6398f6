use crate::error::{Error, Result};
use crate::principal::Principal;
use crate::rule::{AccessRequest, Rule, Selector, resolve_permission};
use crate::store::RuleStore;
use crate::tree::Coordinate;
use crate::types::{AccessKind, OperationName, ResourceName};

/// Resolves a single allow/deny decision from static and stored rules.
#[derive(Debug)]
pub struct RuleResolver<S> {
    store: S,
}

impl<S> RuleResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> RuleResolver<S>
where
    S: RuleStore,
{
    /// Resolves `operation`/`access` for `principal`; `None` means `ALL`.
    ///
    /// Store failures surface as [`Error::Resolution`]; there is no retry.
    pub async fn resolve(
        &self,
        principal: &Principal,
        resource: &ResourceName,
        operation: Option<&OperationName>,
        access: Option<AccessKind>,
    ) -> Result<AccessRequest> {
        let operation = Selector::from_option(operation.cloned());
        let access = Selector::from_option(access);

        let mut rules = self.store.static_rules_for(resource, &operation);
        let stored = self
            .store
            .find_rules(resource, &operation, &access)
            .await
            .map_err(|source| Error::Resolution {
                resource: resource.clone(),
                operation: operation.to_string(),
                source,
            })?;
        rules.extend(stored);

        let relevant: Vec<Rule> = rules
            .into_iter()
            .filter(|rule| rule.is_relevant_to(principal))
            .collect();
        let allowed = resolve_permission(&relevant, &operation, &access);

        tracing::trace!(
            user = %principal.user_id(),
            %resource,
            %operation,
            %access,
            relevant = relevant.len(),
            allowed,
            "resolved access request"
        );

        Ok(AccessRequest {
            resource: resource.clone(),
            operation,
            access,
            allowed,
        })
    }

    /// Resolves one tree leaf.
    pub async fn resolve_coordinate(
        &self,
        principal: &Principal,
        coordinate: &Coordinate,
    ) -> Result<AccessRequest> {
        self.resolve(
            principal,
            &coordinate.resource,
            Some(&coordinate.operation),
            Some(coordinate.kind),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use crate::rule::{PrincipalType, RulePermission};
    use crate::types::{RoleName, UserId};
    use async_trait::async_trait;
    use futures::executor::block_on;

    #[derive(Default)]
    struct TestStore {
        stored: Vec<Rule>,
        static_rules: Vec<Rule>,
        fail: bool,
    }

    #[async_trait]
    impl RuleStore for TestStore {
        async fn find_rules(
            &self,
            resource: &ResourceName,
            operation: &Selector<OperationName>,
            access: &Selector<AccessKind>,
        ) -> std::result::Result<Vec<Rule>, StoreError> {
            if self.fail {
                return Err("rule store offline".into());
            }
            Ok(self
                .stored
                .iter()
                .filter(|rule| rule.matches_filter(resource, operation, access))
                .cloned()
                .collect())
        }

        fn static_rules_for(
            &self,
            _resource: &ResourceName,
            _operation: &Selector<OperationName>,
        ) -> Vec<Rule> {
            self.static_rules.clone()
        }
    }

    fn order() -> ResourceName {
        ResourceName::try_from("Order").unwrap()
    }

    fn cancel() -> OperationName {
        OperationName::try_from("cancel").unwrap()
    }

    fn admin(user: u64) -> Principal {
        Principal::new(UserId::from_numeric(user)).with_role(RoleName::try_from("admin").unwrap())
    }

    #[test]
    fn resolve_denies_without_rules() {
        let resolver = RuleResolver::new(TestStore::default());
        let request = block_on(resolver.resolve(
            &admin(1),
            &order(),
            Some(&cancel()),
            Some(AccessKind::Read),
        ))
        .unwrap();
        assert!(!request.is_allowed());
        assert_eq!(request.operation, Selector::Exact(cancel()));
    }

    #[test]
    fn resolve_prefers_user_deny_over_role_allow() {
        let store = TestStore {
            stored: vec![
                Rule::new(PrincipalType::Role, "admin", order(), RulePermission::Allow)
                    .for_operation(cancel()),
                Rule::new(PrincipalType::User, "1", order(), RulePermission::Deny)
                    .for_operation(cancel())
                    .for_access(AccessKind::Read),
            ],
            ..TestStore::default()
        };
        let resolver = RuleResolver::new(store);

        let read = block_on(resolver.resolve(
            &admin(1),
            &order(),
            Some(&cancel()),
            Some(AccessKind::Read),
        ))
        .unwrap();
        assert!(!read.is_allowed());

        let other_user = block_on(resolver.resolve(
            &admin(2),
            &order(),
            Some(&cancel()),
            Some(AccessKind::Read),
        ))
        .unwrap();
        assert!(other_user.is_allowed());
    }

    #[test]
    fn execute_rule_is_fetched_but_grants_only_execute() {
        let store = TestStore {
            stored: vec![
                Rule::new(PrincipalType::Role, "admin", order(), RulePermission::Allow)
                    .for_operation(cancel())
                    .for_access(AccessKind::Execute),
            ],
            ..TestStore::default()
        };
        let resolver = RuleResolver::new(store);
        let fetched = block_on(resolver.store().find_rules(
            &order(),
            &Selector::Exact(cancel()),
            &Selector::Exact(AccessKind::Read),
        ))
        .unwrap();
        assert_eq!(fetched.len(), 1);

        let resolve = |kind| {
            block_on(resolver.resolve(&admin(1), &order(), Some(&cancel()), Some(kind)))
                .unwrap()
                .is_allowed()
        };
        assert!(!resolve(AccessKind::Read));
        assert!(!resolve(AccessKind::Write));
        assert!(!resolve(AccessKind::Replicate));
        assert!(resolve(AccessKind::Execute));
    }

    #[test]
    fn resolve_ignores_rules_for_roles_not_held() {
        let store = TestStore {
            stored: vec![Rule::new(
                PrincipalType::Role,
                "auditor",
                order(),
                RulePermission::Allow,
            )],
            ..TestStore::default()
        };
        let resolver = RuleResolver::new(store);
        let request = block_on(resolver.resolve(
            &admin(1),
            &order(),
            Some(&cancel()),
            Some(AccessKind::Read),
        ))
        .unwrap();
        assert!(!request.is_allowed());
    }

    #[test]
    fn resolve_combines_static_rules() {
        let store = TestStore {
            static_rules: vec![Rule::new(
                PrincipalType::Role,
                "admin",
                order(),
                RulePermission::Allow,
            )],
            ..TestStore::default()
        };
        let resolver = RuleResolver::new(store);
        let request = block_on(resolver.resolve(
            &admin(1),
            &order(),
            Some(&cancel()),
            Some(AccessKind::Write),
        ))
        .unwrap();
        assert!(request.is_allowed());
    }

    #[test]
    fn resolve_normalizes_missing_filters_to_all() {
        let store = TestStore {
            stored: vec![Rule::new(
                PrincipalType::Role,
                "admin",
                order(),
                RulePermission::Allow,
            )],
            ..TestStore::default()
        };
        let resolver = RuleResolver::new(store);
        let request = block_on(resolver.resolve(&admin(1), &order(), None, None)).unwrap();
        assert_eq!(request.operation, Selector::All);
        assert_eq!(request.access, Selector::All);
        assert!(request.is_allowed());
    }

    #[test]
    fn resolve_surfaces_store_failure() {
        let store = TestStore {
            fail: true,
            ..TestStore::default()
        };
        let resolver = RuleResolver::new(store);
        let result = block_on(resolver.resolve(
            &admin(1),
            &order(),
            Some(&cancel()),
            Some(AccessKind::Read),
        ));
        assert!(matches!(result, Err(Error::Resolution { .. })));
    }
}
