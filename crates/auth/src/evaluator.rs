//! Permission and role queries against a principal.
//!
//! Everything here is a pure function of `(principal, query)`: no IO, no
//! mutation of role data, no hidden state.

use crate::{Permission, Principal};

/// Answers membership and wildcard queries for a principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// True iff some role grants `required` exactly, or through a wildcard
    /// in the resource position, the action position, or both.
    pub fn has_permission(&self, principal: &Principal, required: &Permission) -> bool {
        principal.effective_permissions().allows(required)
    }

    /// String form of [`has_permission`](Self::has_permission).
    ///
    /// A malformed query is never satisfied.
    pub fn has_permission_str(&self, principal: &Principal, required: &str) -> bool {
        match required.parse::<Permission>() {
            Ok(required) => self.has_permission(principal, &required),
            Err(err) => {
                tracing::debug!(error = %err, "malformed permission query");
                false
            }
        }
    }

    pub fn has_role(&self, principal: &Principal, name: &str) -> bool {
        principal.role_names().any(|r| r.as_str() == name)
    }

    /// OR over [`has_role`](Self::has_role); false for an empty list.
    pub fn has_any_role<S: AsRef<str>>(&self, principal: &Principal, names: &[S]) -> bool {
        names.iter().any(|n| self.has_role(principal, n.as_ref()))
    }

    /// AND over [`has_role`](Self::has_role); true for an empty list.
    pub fn has_all_roles<S: AsRef<str>>(&self, principal: &Principal, names: &[S]) -> bool {
        names.iter().all(|n| self.has_role(principal, n.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrincipalId, Role, RoleCatalog, RoleName};
    use proptest::prelude::*;

    fn with_roles(names: &[&'static str]) -> Principal {
        let catalog = RoleCatalog::standard();
        let roles = names
            .iter()
            .map(|n| catalog.resolve(&RoleName::new(*n)))
            .collect();
        Principal::new(PrincipalId::new("p-1"), "tester", roles)
    }

    #[test]
    fn viewer_reads_but_does_not_delete() {
        let eval = PermissionEvaluator::new();
        let viewer = with_roles(&["viewer"]);

        assert!(eval.has_permission_str(&viewer, "products:read"));
        assert!(!eval.has_permission_str(&viewer, "products:delete"));
    }

    #[test]
    fn super_admin_matches_anything() {
        let eval = PermissionEvaluator::new();
        let root = with_roles(&["super_admin"]);

        assert!(eval.has_permission_str(&root, "anything:anything"));
    }

    #[test]
    fn malformed_query_is_denied() {
        let eval = PermissionEvaluator::new();
        let root = with_roles(&["super_admin"]);

        assert!(!eval.has_permission_str(&root, "no-separator"));
    }

    #[test]
    fn role_queries_are_exact() {
        let eval = PermissionEvaluator::new();
        let p = with_roles(&["manager", "viewer"]);

        assert!(eval.has_role(&p, "manager"));
        assert!(!eval.has_role(&p, "Manager"));
        assert!(eval.has_any_role(&p, &["admin", "viewer"]));
        assert!(!eval.has_any_role(&p, &["admin", "super_admin"]));
        assert!(eval.has_all_roles(&p, &["manager", "viewer"]));
        assert!(!eval.has_all_roles(&p, &["manager", "admin"]));
    }

    fn segment() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("*".to_string()),
            "[a-c]{1,2}".prop_map(|s| s),
        ]
    }

    fn grant() -> impl Strategy<Value = Permission> {
        (segment(), segment()).prop_map(|(r, a)| Permission::new(r, a))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a query is satisfied iff some role grants r:a, r:*, *:a or *:*.
        #[test]
        fn wildcard_rule_matches_definition(
            roles in prop::collection::vec(prop::collection::vec(grant(), 0..4), 0..3),
            resource in "[a-c]{1,2}",
            action in "[a-c]{1,2}",
        ) {
            let roles: Vec<Role> = roles
                .into_iter()
                .enumerate()
                .map(|(i, perms)| Role::new(format!("role-{i}"), perms))
                .collect();
            let principal = Principal::new(PrincipalId::new("p"), "p", roles.clone());
            let query = Permission::new(resource.clone(), action.clone());

            let expected = roles.iter().flat_map(|r| r.permissions()).any(|g| {
                (g.resource() == resource || g.resource() == "*")
                    && (g.action() == action || g.action() == "*")
            });

            prop_assert_eq!(PermissionEvaluator::new().has_permission(&principal, &query), expected);
        }

        #[test]
        fn empty_role_lists_follow_vacuous_truth(
            names in prop::collection::vec("[a-z]{1,8}", 0..4),
        ) {
            let roles = names.into_iter().map(|n| Role::named(n)).collect();
            let principal = Principal::new(PrincipalId::new("p"), "p", roles);
            let none: [&str; 0] = [];

            prop_assert!(PermissionEvaluator::new().has_all_roles(&principal, &none));
            prop_assert!(!PermissionEvaluator::new().has_any_role(&principal, &none));
        }
    }
}
