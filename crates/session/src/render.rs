//! Primary-or-fallback selection for UI fragments.

use tokio::sync::watch;

use accessgate_auth::{AccessDecision, AccessRequirement};

use crate::manager::SessionManager;
use crate::state::SessionSnapshot;

/// Chooses between a primary fragment and an optional fallback using the
/// same decision as [`AccessGuard`](crate::AccessGuard).
///
/// The session is observed, not captured: [`render`](Self::render) always
/// reads the latest snapshot, and [`changed`](Self::changed) wakes up on every
/// session transition so the caller can render again.
#[derive(Debug)]
pub struct ConditionalRenderer<T> {
    requirement: AccessRequirement,
    primary: T,
    fallback: Option<T>,
    session: watch::Receiver<SessionSnapshot>,
}

impl<T> ConditionalRenderer<T> {
    pub fn new(session: &SessionManager, requirement: AccessRequirement, primary: T) -> Self {
        Self {
            requirement,
            primary,
            fallback: None,
            session: session.subscribe(),
        }
    }

    /// Fragment shown when the requirement is not met.
    pub fn with_fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn requirement(&self) -> &AccessRequirement {
        &self.requirement
    }

    pub fn decision(&self) -> AccessDecision {
        self.session.borrow().decide(&self.requirement)
    }

    /// The fragment to show now; `None` when denied without a fallback.
    pub fn render(&self) -> Option<&T> {
        if self.decision().is_allowed() {
            Some(&self.primary)
        } else {
            self.fallback.as_ref()
        }
    }

    /// Wait for the next session transition.
    ///
    /// Returns `false` once the session manager is gone and nothing can change
    /// anymore.
    pub async fn changed(&mut self) -> bool {
        self.session.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::LoginRequest;
    use crate::mock::{DEMO_PASSWORD, MockAuthBackend};
    use crate::token_store::InMemoryTokenStore;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(MockAuthBackend::with_demo_users()),
            Arc::new(InMemoryTokenStore::new()),
        )
    }

    fn delete_products() -> AccessRequirement {
        AccessRequirement::authenticated()
            .with_permissions(["products:delete"])
            .unwrap()
    }

    #[tokio::test]
    async fn follows_session_changes() {
        let session = manager();
        let mut renderer =
            ConditionalRenderer::new(&session, delete_products(), "delete").with_fallback("locked");

        assert_eq!(renderer.render(), Some(&"locked"));

        session
            .login(LoginRequest::new("manager", DEMO_PASSWORD))
            .await
            .unwrap();
        assert!(renderer.changed().await);
        assert_eq!(renderer.render(), Some(&"delete"));

        session.logout().await;
        assert!(renderer.changed().await);
        assert_eq!(renderer.render(), Some(&"locked"));
    }

    #[tokio::test]
    async fn denied_without_fallback_renders_nothing() {
        let session = manager();
        session
            .login(LoginRequest::new("viewer", DEMO_PASSWORD))
            .await
            .unwrap();

        let renderer = ConditionalRenderer::new(&session, delete_products(), "delete");
        assert_eq!(renderer.render(), None);
    }

    #[tokio::test]
    async fn changed_reports_closed_session() {
        let session = manager();
        let mut renderer = ConditionalRenderer::new(&session, AccessRequirement::authenticated(), ());
        drop(session);

        assert!(!renderer.changed().await);
    }
}
