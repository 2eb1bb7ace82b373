//! Dev-mode authentication backend.
//!
//! Keeps a user directory and the issued tokens in memory. Besides the
//! [`AuthBackend`] contract it also plays the resource server: [`check`]
//! rejects access tokens it did not issue or has since expired, which is what
//! drives the refresh path in local runs and tests.
//!
//! [`check`]: MockAuthBackend::check

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use accessgate_auth::{Principal, PrincipalId, Role, RoleCatalog};

use crate::authorizer::StatusFailure;
use crate::backend::{AuthBackend, BackendError, LoginGrant, LoginRequest, RefreshGrant};
use crate::credential::{AccessToken, CredentialPair, RefreshToken};

/// Password shared by the demo users.
pub const DEMO_PASSWORD: &str = "demo";

const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Clone)]
struct MockUser {
    password: String,
    principal: Principal,
}

#[derive(Debug, Default)]
struct Issued {
    /// access token -> username
    access: HashMap<String, String>,
    /// refresh token -> username
    refresh: HashMap<String, String>,
}

#[derive(Debug)]
pub struct MockAuthBackend {
    users: Mutex<HashMap<String, MockUser>>,
    issued: Mutex<Issued>,
    access_ttl_secs: u64,
    login_delay: Option<Duration>,
    refresh_delay: Option<Duration>,
    refresh_calls: AtomicUsize,
    fail_refresh: AtomicBool,
    refresh_claims: AtomicBool,
}

impl Default for MockAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthBackend {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            issued: Mutex::new(Issued::default()),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            login_delay: None,
            refresh_delay: None,
            refresh_calls: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            refresh_claims: AtomicBool::new(false),
        }
    }

    /// One user per role of [`RoleCatalog::standard`], named after the role,
    /// all with password [`DEMO_PASSWORD`].
    pub fn with_demo_users() -> Self {
        let catalog = RoleCatalog::standard();
        let mut backend = Self::new();
        for (idx, definition) in catalog.definitions().enumerate() {
            let name = definition.role.name().as_str().to_string();
            let principal = Principal::new(
                PrincipalId::new(format!("demo-{}", idx + 1)),
                name.clone(),
                vec![definition.role.clone()],
            )
            .with_display_name(format!("Demo {name}"));
            backend = backend.with_user(name, DEMO_PASSWORD, principal);
        }
        backend
    }

    pub fn with_user(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
        principal: Principal,
    ) -> Self {
        lock(&self.users).insert(
            username.into(),
            MockUser {
                password: password.into(),
                principal,
            },
        );
        self
    }

    /// Lifetime announced for issued access tokens.
    pub fn with_access_ttl(mut self, secs: u64) -> Self {
        self.access_ttl_secs = secs;
        self
    }

    /// Make every login call take `delay` before answering.
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    /// Make every refresh call take `delay` before answering.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// Number of refresh calls received so far.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Include the user's current principal in refresh grants.
    pub fn set_refresh_claims(&self, include: bool) {
        self.refresh_claims.store(include, Ordering::SeqCst);
    }

    /// Replace a user's roles; visible to clients on their next refresh (with
    /// claims enabled) or resume.
    pub fn set_roles(&self, username: &str, roles: Vec<Role>) -> bool {
        let mut users = lock(&self.users);
        let Some(user) = users.get_mut(username) else {
            return false;
        };
        let p = &user.principal;
        let mut updated = Principal::new(p.id.clone(), p.username.clone(), roles);
        updated.display_name = p.display_name.clone();
        updated.email = p.email.clone();
        updated.attributes = p.attributes.clone();
        user.principal = updated;
        true
    }

    /// Invalidate every outstanding access token; refresh tokens stay valid.
    pub fn expire_access_tokens(&self) {
        lock(&self.issued).access.clear();
    }

    pub fn is_access_token_valid(&self, token: &AccessToken) -> bool {
        lock(&self.issued).access.contains_key(token.expose())
    }

    /// Resource-server check: the principal behind `token`, or a 401.
    pub fn check(&self, token: &AccessToken) -> Result<Principal, StatusFailure> {
        let username = lock(&self.issued)
            .access
            .get(token.expose())
            .cloned()
            .ok_or_else(|| StatusFailure::unauthorized("access token expired or unknown"))?;
        self.principal_of(&username)
            .ok_or_else(|| StatusFailure::unauthorized("user no longer exists"))
    }

    fn principal_of(&self, username: &str) -> Option<Principal> {
        lock(&self.users).get(username).map(|u| u.principal.clone())
    }

    fn issue_access(&self, username: &str) -> AccessToken {
        let token = format!("mock-access-{}", Uuid::now_v7());
        lock(&self.issued)
            .access
            .insert(token.clone(), username.to_string());
        AccessToken::new(token)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl AuthBackend for MockAuthBackend {
    async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, BackendError> {
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }
        let principal = {
            let users = lock(&self.users);
            match users.get(&request.username) {
                Some(user) if user.password == request.password => user.principal.clone(),
                _ => return Err(BackendError::Rejected("invalid username or password".into())),
            }
        };

        let access_token = self.issue_access(&request.username);
        let refresh = format!("mock-refresh-{}", Uuid::now_v7());
        lock(&self.issued)
            .refresh
            .insert(refresh.clone(), request.username.clone());

        tracing::debug!(username = %request.username, "mock backend issued credential");
        Ok(LoginGrant {
            principal,
            access_token,
            refresh_token: RefreshToken::new(refresh),
            expires_in_seconds: self.access_ttl_secs,
        })
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<RefreshGrant, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("refresh token revoked".into()));
        }

        let username = {
            let mut issued = lock(&self.issued);
            let Some(username) = issued.refresh.get(refresh_token.expose()).cloned() else {
                return Err(BackendError::Rejected("unknown refresh token".into()));
            };
            // A refresh supersedes the user's earlier access tokens.
            issued.access.retain(|_, owner| *owner != username);
            username
        };

        let principal = if self.refresh_claims.load(Ordering::SeqCst) {
            self.principal_of(&username)
        } else {
            None
        };

        Ok(RefreshGrant {
            access_token: self.issue_access(&username),
            refresh_token: None,
            expires_in_seconds: self.access_ttl_secs,
            principal,
        })
    }

    async fn logout(&self, credential: &CredentialPair) -> Result<(), BackendError> {
        let mut issued = lock(&self.issued);
        issued.access.remove(credential.access_token().expose());
        issued.refresh.remove(credential.refresh_token().expose());
        Ok(())
    }

    async fn current_principal(&self, access_token: &AccessToken) -> Result<Principal, BackendError> {
        self.check(access_token)
            .map_err(|failure| BackendError::Rejected(failure.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessgate_auth::PermissionEvaluator;

    #[tokio::test]
    async fn demo_users_log_in_with_standard_roles() {
        let backend = MockAuthBackend::with_demo_users();

        let grant = backend
            .login(&LoginRequest::new("viewer", DEMO_PASSWORD))
            .await
            .unwrap();

        assert_eq!(grant.principal.username, "viewer");
        assert!(PermissionEvaluator.has_permission_str(&grant.principal, "products:read"));
        assert!(!PermissionEvaluator.has_permission_str(&grant.principal, "products:delete"));
        assert!(backend.is_access_token_valid(&grant.access_token));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let backend = MockAuthBackend::with_demo_users();
        let err = backend
            .login(&LoginRequest::new("admin", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn refresh_replaces_access_token_and_counts_calls() {
        let backend = MockAuthBackend::with_demo_users();
        let grant = backend
            .login(&LoginRequest::new("manager", DEMO_PASSWORD))
            .await
            .unwrap();

        let refreshed = backend.refresh(&grant.refresh_token).await.unwrap();

        assert_eq!(backend.refresh_calls(), 1);
        assert!(!backend.is_access_token_valid(&grant.access_token));
        assert!(backend.is_access_token_valid(&refreshed.access_token));
        assert!(refreshed.refresh_token.is_none());
        assert!(refreshed.principal.is_none());
    }

    #[tokio::test]
    async fn expired_tokens_fail_the_resource_check_with_401() {
        let backend = MockAuthBackend::with_demo_users();
        let grant = backend
            .login(&LoginRequest::new("admin", DEMO_PASSWORD))
            .await
            .unwrap();
        assert!(backend.check(&grant.access_token).is_ok());

        backend.expire_access_tokens();

        let failure = backend.check(&grant.access_token).unwrap_err();
        assert_eq!(failure.status, StatusFailure::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failing_refresh_is_a_rejection() {
        let backend = MockAuthBackend::with_demo_users();
        let grant = backend
            .login(&LoginRequest::new("admin", DEMO_PASSWORD))
            .await
            .unwrap();
        backend.set_fail_refresh(true);

        let err = backend.refresh(&grant.refresh_token).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
        assert_eq!(backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_claims_carry_updated_roles() {
        let backend = MockAuthBackend::with_demo_users();
        let grant = backend
            .login(&LoginRequest::new("viewer", DEMO_PASSWORD))
            .await
            .unwrap();

        let catalog = RoleCatalog::standard();
        assert!(backend.set_roles("viewer", vec![catalog.resolve(&"manager".into())]));
        backend.set_refresh_claims(true);

        let refreshed = backend.refresh(&grant.refresh_token).await.unwrap();
        let principal = refreshed.principal.unwrap();
        assert!(PermissionEvaluator.has_role(&principal, "manager"));
    }
}
