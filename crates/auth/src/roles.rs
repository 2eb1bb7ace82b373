use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role name, compared exactly (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A named, immutable set of permissions.
///
/// On the wire a role is either a bare name (`"viewer"`) or an object with
/// its permissions (`{"name": "viewer", "permissions": ["products:read"]}`).
/// Bare names carry no permissions until resolved against a [`RoleCatalog`];
/// an object with an empty permission list is a role that grants nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RoleWire", into = "RoleWire")]
pub struct Role {
    name: RoleName,
    permissions: BTreeSet<Permission>,
    bare: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RoleWire {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        permissions: Vec<Permission>,
    },
}

impl From<RoleWire> for Role {
    fn from(value: RoleWire) -> Self {
        match value {
            RoleWire::Name(name) => Role::named(name),
            RoleWire::Full { name, permissions } => Role::new(name, permissions),
        }
    }
}

impl From<Role> for RoleWire {
    fn from(role: Role) -> Self {
        let name = role.name.as_str().to_string();
        if role.bare {
            RoleWire::Name(name)
        } else {
            RoleWire::Full {
                name,
                permissions: role.permissions.into_iter().collect(),
            }
        }
    }
}

impl Role {
    pub fn new(
        name: impl Into<RoleName>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().collect(),
            bare: false,
        }
    }

    /// A role known only by name.
    pub fn named(name: impl Into<RoleName>) -> Self {
        Self {
            bare: true,
            ..Self::new(name, [])
        }
    }

    pub fn name(&self) -> &RoleName {
        &self.name
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Delivered as a bare name, still waiting for catalog resolution.
    pub fn is_bare(&self) -> bool {
        self.bare
    }
}

/// Role definition with a description, for display in role pickers and audits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    pub role: Role,
    pub description: Option<String>,
}

/// Lookup table of role definitions by name.
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: BTreeMap<RoleName, RoleDefinition>,
}

impl RoleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a role definition.
    pub fn with_role(mut self, role: Role, description: Option<&str>) -> Self {
        self.insert(role, description);
        self
    }

    pub fn insert(&mut self, role: Role, description: Option<&str>) {
        self.roles.insert(
            role.name().clone(),
            RoleDefinition {
                role,
                description: description.map(str::to_string),
            },
        );
    }

    /// Parse a JSON array of roles with their permissions.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let roles: Vec<Role> = serde_json::from_str(json)?;
        Ok(roles.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RoleDefinition> {
        self.roles.get(&RoleName::new(name.to_string()))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.roles.values()
    }

    /// Resolve a role name to its definition.
    ///
    /// Unknown names resolve to a role with no permissions.
    pub fn resolve(&self, name: &RoleName) -> Role {
        match self.roles.get(name) {
            Some(def) => def.role.clone(),
            None => {
                tracing::warn!(role = %name, "unknown role name; resolving with no permissions");
                Role::named(name.clone())
            }
        }
    }

    /// Roles used by the bundled dev-mode backend and the examples in the docs.
    pub fn standard() -> Self {
        let p = |s: &'static str| -> Permission {
            let (resource, action) = s.split_once(':').unwrap_or((s, "*"));
            Permission::new(resource, action)
        };

        Self::new()
            .with_role(
                Role::new("viewer", [p("products:read"), p("orders:read"), p("reports:read")]),
                Some("Read-only access to catalog, orders and reports"),
            )
            .with_role(
                Role::new(
                    "manager",
                    [p("products:*"), p("orders:*"), p("reports:read"), p("reports:export")],
                ),
                Some("Manages catalog and orders"),
            )
            .with_role(
                Role::new("admin", [p("*:read"), p("products:*"), p("orders:*"), p("users:*")]),
                Some("Administers users and business data"),
            )
            .with_role(
                Role::new("super_admin", [Permission::all()]),
                Some("Unrestricted access"),
            )
    }
}

impl FromIterator<Role> for RoleCatalog {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for role in iter {
            catalog.insert(role, None);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_deserializes_from_bare_name_or_object() {
        let roles: Vec<Role> = serde_json::from_str(
            r#"["viewer", {"name": "manager", "permissions": ["orders:write"]}]"#,
        )
        .unwrap();

        assert_eq!(roles[0].name().as_str(), "viewer");
        assert!(roles[0].is_empty());
        assert!(roles[0].is_bare());
        assert!(!roles[1].is_bare());
        assert_eq!(roles[1].name().as_str(), "manager");
        assert_eq!(
            roles[1].permissions().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["orders:write"]
        );
    }

    #[test]
    fn catalog_resolves_known_and_unknown_names() {
        let catalog = RoleCatalog::standard();

        let viewer = catalog.resolve(&RoleName::new("viewer"));
        assert_eq!(viewer.permissions().count(), 3);

        let ghost = catalog.resolve(&RoleName::new("ghost"));
        assert_eq!(ghost.name().as_str(), "ghost");
        assert!(ghost.is_empty());
    }

    #[test]
    fn standard_super_admin_holds_full_wildcard() {
        let catalog = RoleCatalog::standard();
        let def = catalog.get("super_admin").unwrap();
        assert!(def.role.permissions().any(|p| *p == Permission::all()));
    }

    #[test]
    fn catalog_loads_from_json() {
        let catalog = RoleCatalog::from_json(
            r#"[{"name": "auditor", "permissions": ["*:read", "reports:export"]}]"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 1);
        let auditor = catalog.resolve(&RoleName::new("auditor"));
        assert_eq!(auditor.permissions().count(), 2);
        assert!(RoleCatalog::from_json(r#"[{"name": "x", "permissions": ["bad"]}]"#).is_err());
    }

    #[test]
    fn bare_and_explicit_roles_keep_their_wire_form() {
        let json = serde_json::to_string(&vec![
            Role::named("viewer"),
            Role::new("auditor", Vec::<Permission>::new()),
        ])
        .unwrap();
        assert_eq!(json, r#"["viewer",{"name":"auditor","permissions":[]}]"#);

        let back: Vec<Role> = serde_json::from_str(&json).unwrap();
        assert!(back[0].is_bare());
        assert!(!back[1].is_bare());
    }
}
