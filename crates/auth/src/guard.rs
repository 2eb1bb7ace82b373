//! Access decisions for navigation targets and UI fragments.

use serde::{Deserialize, Serialize};

use crate::{ParsePermissionError, Permission, PermissionEvaluator, Principal, RoleName};

/// Access requirement attached to a route or UI fragment.
///
/// Roles are combined with OR unless `require_all` is set. Permissions are
/// always AND-combined, independent of `require_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequirement {
    #[serde(default)]
    pub required_roles: Vec<RoleName>,
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
    #[serde(default)]
    pub require_all: bool,
}

impl AccessRequirement {
    /// Any authenticated principal.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn any_role<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleName>,
    {
        Self {
            required_roles: roles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn all_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleName>,
    {
        Self {
            require_all: true,
            ..Self::any_role(roles)
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.required_permissions.push(permission);
        self
    }

    /// Parse `resource:action` strings into required permissions.
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Result<Self, ParsePermissionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in permissions {
            self.required_permissions.push(p.as_ref().parse()?);
        }
        Ok(self)
    }

    fn role_names(&self) -> Vec<&str> {
        self.required_roles.iter().map(RoleName::as_str).collect()
    }
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No session: send the user to login.
    Unauthenticated,
    /// Authenticated, but roles or permissions are insufficient.
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decide whether `principal` satisfies `requirement`.
///
/// `None` means there is no session. Evaluated fresh on every call; nothing is
/// cached between decisions.
pub fn decide(principal: Option<&Principal>, requirement: &AccessRequirement) -> AccessDecision {
    let Some(principal) = principal else {
        return AccessDecision::Deny(DenyReason::Unauthenticated);
    };

    let eval = PermissionEvaluator::new();
    let roles = requirement.role_names();

    let roles_ok = roles.is_empty()
        || if requirement.require_all {
            eval.has_all_roles(principal, &roles)
        } else {
            eval.has_any_role(principal, &roles)
        };

    let perms_ok = requirement
        .required_permissions
        .iter()
        .all(|p| eval.has_permission(principal, p));

    if roles_ok && perms_ok {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny(DenyReason::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrincipalId, RoleCatalog};

    fn principal(roles: &[&'static str]) -> Principal {
        let catalog = RoleCatalog::standard();
        Principal::new(
            PrincipalId::new("u"),
            "user",
            roles.iter().map(|r| catalog.resolve(&RoleName::new(*r))).collect(),
        )
    }

    #[test]
    fn no_principal_is_unauthenticated() {
        let decision = decide(None, &AccessRequirement::authenticated());
        assert_eq!(decision, AccessDecision::Deny(DenyReason::Unauthenticated));
    }

    #[test]
    fn empty_requirement_allows_any_principal() {
        let p = principal(&[]);
        assert!(decide(Some(&p), &AccessRequirement::authenticated()).is_allowed());
    }

    #[test]
    fn manager_is_not_admin() {
        let p = principal(&["manager"]);
        let req = AccessRequirement::any_role(["admin", "super_admin"]);
        assert_eq!(decide(Some(&p), &req), AccessDecision::Deny(DenyReason::Forbidden));
    }

    #[test]
    fn require_all_needs_every_role() {
        let p = principal(&["manager", "viewer"]);

        assert!(decide(Some(&p), &AccessRequirement::all_roles(["manager", "viewer"])).is_allowed());
        assert!(!decide(Some(&p), &AccessRequirement::all_roles(["manager", "admin"])).is_allowed());
        assert!(decide(Some(&p), &AccessRequirement::any_role(["manager", "admin"])).is_allowed());
    }

    #[test]
    fn permissions_are_and_combined_even_without_require_all() {
        let p = principal(&["viewer"]);
        let req = AccessRequirement::authenticated()
            .with_permissions(["products:read", "products:write"])
            .unwrap();

        assert!(!req.require_all);
        assert_eq!(decide(Some(&p), &req), AccessDecision::Deny(DenyReason::Forbidden));
    }

    #[test]
    fn roles_and_permissions_must_both_hold() {
        let p = principal(&["manager"]);
        let req = AccessRequirement::any_role(["manager"])
            .with_permissions(["orders:cancel"])
            .unwrap();
        assert!(decide(Some(&p), &req).is_allowed());

        let req = AccessRequirement::any_role(["manager"])
            .with_permissions(["users:create"])
            .unwrap();
        assert!(!decide(Some(&p), &req).is_allowed());
    }

    #[test]
    fn repeated_decisions_are_identical() {
        let p = principal(&["viewer"]);
        let req = AccessRequirement::any_role(["viewer"]);
        let first = decide(Some(&p), &req);
        let second = decide(Some(&p), &req);
        assert_eq!(first, second);
    }

    #[test]
    fn requirement_deserializes_from_route_metadata() {
        let req: AccessRequirement = serde_json::from_str(
            r#"{"requiredRoles": ["admin"], "requiredPermissions": ["users:read"], "requireAll": true}"#,
        )
        .unwrap();

        assert_eq!(req.required_roles, vec![RoleName::new("admin")]);
        assert_eq!(req.required_permissions[0].to_string(), "users:read");
        assert!(req.require_all);

        let empty: AccessRequirement = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, AccessRequirement::authenticated());
    }

    #[test]
    fn decision_serializes_with_reason() {
        let json = serde_json::to_string(&AccessDecision::Deny(DenyReason::Forbidden)).unwrap();
        assert_eq!(json, r#"{"decision":"deny","reason":"forbidden"}"#);
        let json = serde_json::to_string(&AccessDecision::Allow).unwrap();
        assert_eq!(json, r#"{"decision":"allow"}"#);
    }
}
