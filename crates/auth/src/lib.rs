//! Authorization model and access decisions.
//!
//! No transport, storage or async here: every decision is a function of a
//! principal and a requirement.

pub mod evaluator;
pub mod explain;
pub mod guard;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use evaluator::PermissionEvaluator;
pub use explain::{DecisionExplanation, PrincipalSummary, explain};
pub use guard::{AccessDecision, AccessRequirement, DenyReason, decide};
pub use permissions::{ParsePermissionError, Permission};
pub use principal::{EffectivePermissions, Principal, PrincipalId};
pub use roles::{Role, RoleCatalog, RoleDefinition, RoleName};
