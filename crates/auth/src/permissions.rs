use std::borrow::Cow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value in either position of a permission that matches anything.
pub const WILDCARD: &str = "*";

/// Permission identifier in canonical `resource:action` form.
///
/// Either position may be the wildcard `*`, in which case a granted permission
/// matches any concrete value in that position. Comparisons are exact and
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    resource: Cow<'static, str>,
    action: Cow<'static, str>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParsePermissionError {
    #[error("permission '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    #[error("permission '{0}' has an empty resource")]
    EmptyResource(String),

    #[error("permission '{0}' has an empty action")]
    EmptyAction(String),
}

impl Permission {
    /// Build a permission from its parts.
    ///
    /// Parts are taken as-is; use [`str::parse`] for untrusted input.
    pub fn new(
        resource: impl Into<Cow<'static, str>>,
        action: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// The `*:*` permission.
    pub fn all() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource == WILDCARD || self.action == WILDCARD
    }

    /// Whether holding `self` satisfies a request for `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        (self.resource == WILDCARD || self.resource == required.resource)
            && (self.action == WILDCARD || self.action == required.action)
    }
}

impl FromStr for Permission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| ParsePermissionError::MissingSeparator(s.to_string()))?;

        if resource.is_empty() {
            return Err(ParsePermissionError::EmptyResource(s.to_string()));
        }
        if action.is_empty() {
            return Err(ParsePermissionError::EmptyAction(s.to_string()));
        }

        Ok(Self::new(resource.to_string(), action.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = ParsePermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.to_string()
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let p: Permission = "products:read".parse().unwrap();
        assert_eq!(p.resource(), "products");
        assert_eq!(p.action(), "read");
        assert_eq!(p.to_string(), "products:read");
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            "products".parse::<Permission>(),
            Err(ParsePermissionError::MissingSeparator(_))
        ));
        assert!(matches!(
            ":read".parse::<Permission>(),
            Err(ParsePermissionError::EmptyResource(_))
        ));
        assert!(matches!(
            "products:".parse::<Permission>(),
            Err(ParsePermissionError::EmptyAction(_))
        ));
    }

    #[test]
    fn wildcard_positions_grant_independently() {
        let read = Permission::new("products", "read");
        let delete = Permission::new("products", "delete");
        let orders = Permission::new("orders", "read");

        assert!(Permission::new("products", "*").grants(&delete));
        assert!(!Permission::new("products", "*").grants(&orders));
        assert!(Permission::new("*", "read").grants(&orders));
        assert!(!Permission::new("*", "read").grants(&delete));
        assert!(Permission::all().grants(&read));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        let granted = Permission::new("products", "read");
        assert!(!granted.grants(&Permission::new("Products", "read")));
        assert!(!granted.grants(&Permission::new("products", "READ")));
    }

    #[test]
    fn serializes_as_canonical_string() {
        let p = Permission::new("reports", "read");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"reports:read\"");

        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);

        assert!(serde_json::from_str::<Permission>("\"reports\"").is_err());
    }
}
