use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::permissions::WILDCARD;
use crate::{Permission, Role, RoleCatalog, RoleName};

/// Identity of an authenticated principal, as issued by the backend.
///
/// Opaque to this layer: backends use UUIDs, numeric ids or usernames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Cow<'static, str>);

impl PrincipalId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated identity plus its assigned roles.
///
/// The effective permission set (union over all roles) is computed on first
/// use and kept for the lifetime of this value. A refreshed principal is a new
/// value, so the cache never outlives the claims it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    roles: Vec<Role>,
    #[serde(skip)]
    effective: OnceLock<EffectivePermissions>,
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.username == other.username
            && self.display_name == other.display_name
            && self.email == other.email
            && self.attributes == other.attributes
            && self.roles == other.roles
    }
}

impl Eq for Principal {}

impl Principal {
    pub fn new(id: PrincipalId, username: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            email: None,
            attributes: BTreeMap::new(),
            roles,
            effective: OnceLock::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role_names(&self) -> impl Iterator<Item = &RoleName> {
        self.roles.iter().map(Role::name)
    }

    /// Replace roles that arrived as bare names with their catalog definitions.
    ///
    /// Roles delivered with a permission list are kept as-is, even when that
    /// list is empty.
    pub fn resolve_roles(mut self, catalog: &RoleCatalog) -> Self {
        for role in &mut self.roles {
            if role.is_bare() {
                *role = catalog.resolve(role.name());
            }
        }
        self.effective = OnceLock::new();
        self
    }

    /// Union of the permissions of every role held.
    pub fn effective_permissions(&self) -> &EffectivePermissions {
        self.effective
            .get_or_init(|| EffectivePermissions::from_roles(&self.roles))
    }
}

/// Flattened permission set of a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    granted: BTreeSet<Permission>,
}

impl EffectivePermissions {
    pub fn from_roles<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Self {
        let granted = roles
            .into_iter()
            .flat_map(|role| role.permissions().cloned())
            .collect();
        Self { granted }
    }

    /// Exact match, or a grant whose wildcard positions cover `required`.
    pub fn allows(&self, required: &Permission) -> bool {
        let resource = required.resource().to_string();
        let action = required.action().to_string();

        self.granted.contains(required)
            || self
                .granted
                .contains(&Permission::new(resource, WILDCARD))
            || self
                .granted
                .contains(&Permission::new(WILDCARD, action))
            || self.granted.contains(&Permission::all())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.granted.iter()
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}
