// ─────────────────────────────────────────────────────────────────────────────
// Decision Explanation (access-denied views, audit trail)
// ─────────────────────────────────────────────────────────────────────────────

use serde::Serialize;

use crate::{
    AccessDecision, AccessRequirement, DenyReason, PermissionEvaluator, Principal, decide,
};

/// Detailed explanation of an access decision.
///
/// Carries enough detail for an access-denied view to tell the user what is
/// missing, and for a log line to record why a navigation was refused.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionExplanation {
    pub decision: AccessDecision,

    /// Human-readable reason for the decision.
    pub reason: String,

    /// Snapshot of the principal the decision was made for, if any.
    pub principal: Option<PrincipalSummary>,

    /// Required roles the principal lacks. Under require-any this lists every
    /// required role when none is held.
    pub missing_roles: Vec<String>,

    /// Required permissions not covered by any grant.
    pub missing_permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalSummary {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub has_wildcard: bool,
}

impl PrincipalSummary {
    fn of(principal: &Principal) -> Self {
        let effective = principal.effective_permissions();
        Self {
            id: principal.id.to_string(),
            username: principal.username.clone(),
            roles: principal.role_names().map(ToString::to_string).collect(),
            effective_permissions: effective.iter().map(ToString::to_string).collect(),
            has_wildcard: effective.iter().any(|p| p.is_wildcard()),
        }
    }
}

/// Explain the decision [`decide`] makes for the same inputs.
pub fn explain(principal: Option<&Principal>, requirement: &AccessRequirement) -> DecisionExplanation {
    let decision = decide(principal, requirement);

    let Some(principal) = principal else {
        return DecisionExplanation {
            decision,
            reason: "No authenticated session".to_string(),
            principal: None,
            missing_roles: requirement
                .required_roles
                .iter()
                .map(ToString::to_string)
                .collect(),
            missing_permissions: requirement
                .required_permissions
                .iter()
                .map(ToString::to_string)
                .collect(),
        };
    };

    let eval = PermissionEvaluator::new();

    let lacking: Vec<String> = requirement
        .required_roles
        .iter()
        .filter(|r| !eval.has_role(principal, r.as_str()))
        .map(ToString::to_string)
        .collect();

    // Under require-any, holding one role satisfies the whole list.
    let missing_roles = if !requirement.require_all && lacking.len() < requirement.required_roles.len() {
        Vec::new()
    } else {
        lacking
    };

    let missing_permissions: Vec<String> = requirement
        .required_permissions
        .iter()
        .filter(|p| !eval.has_permission(principal, p))
        .map(ToString::to_string)
        .collect();

    let reason = match decision {
        AccessDecision::Allow if requirement.required_roles.is_empty()
            && requirement.required_permissions.is_empty() =>
        {
            "Any authenticated principal may access this target".to_string()
        }
        AccessDecision::Allow => format!(
            "Principal '{}' satisfies every role and permission requirement",
            principal.username
        ),
        AccessDecision::Deny(DenyReason::Forbidden) => {
            let mut parts = Vec::new();
            if !missing_roles.is_empty() {
                let joiner = if requirement.require_all { "all of" } else { "one of" };
                parts.push(format!("requires {joiner} roles {missing_roles:?}"));
            }
            if !missing_permissions.is_empty() {
                parts.push(format!("missing permissions {missing_permissions:?}"));
            }
            format!("Principal '{}' {}", principal.username, parts.join("; "))
        }
        AccessDecision::Deny(DenyReason::Unauthenticated) => "No authenticated session".to_string(),
    };

    DecisionExplanation {
        decision,
        reason,
        principal: Some(PrincipalSummary::of(principal)),
        missing_roles,
        missing_permissions,
    }
}
