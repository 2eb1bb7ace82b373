//! Navigation guard over the live session.

use accessgate_auth::{AccessDecision, AccessRequirement, DecisionExplanation, explain};

use crate::manager::SessionManager;

/// Decides whether a navigation target may be entered.
///
/// Holds no decision state: every [`check`](Self::check) reads the session as
/// it is at that moment.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    session: SessionManager,
}

impl AccessGuard {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn check(&self, requirement: &AccessRequirement) -> AccessDecision {
        let decision = self.session.snapshot().decide(requirement);
        if !decision.is_allowed() {
            tracing::debug!(?decision, "navigation denied");
        }
        decision
    }

    /// [`check`](Self::check) plus the roles and permissions behind the
    /// outcome, for an access-denied view.
    pub fn explain(&self, requirement: &AccessRequirement) -> DecisionExplanation {
        let snapshot = self.session.snapshot();
        explain(snapshot.principal(), requirement)
    }
}
