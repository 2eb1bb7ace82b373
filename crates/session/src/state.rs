//! Observable session state.

use std::sync::Arc;

use serde::Serialize;

use accessgate_auth::{AccessDecision, AccessRequirement, Principal, decide};

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    Expired,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Refreshing => "refreshing",
            SessionPhase::Expired => "expired",
        }
    }
}

impl core::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session, published on every transition.
///
/// Carries no tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    phase: SessionPhase,
    principal: Option<Arc<Principal>>,
}

impl SessionSnapshot {
    pub(crate) fn new(phase: SessionPhase, principal: Option<Arc<Principal>>) -> Self {
        Self { phase, principal }
    }

    pub fn anonymous() -> Self {
        Self::new(SessionPhase::Anonymous, None)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Present only while `Authenticated` or `Refreshing`.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_deref()
    }

    pub fn principal_arc(&self) -> Option<Arc<Principal>> {
        self.principal.clone()
    }

    pub fn decide(&self, requirement: &AccessRequirement) -> AccessDecision {
        decide(self.principal(), requirement)
    }
}
