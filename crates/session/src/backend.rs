//! Boundary to the service that issues credentials and owns role data.
//!
//! The session layer only depends on [`AuthBackend`]; the dev-mode
//! [`MockAuthBackend`](crate::mock::MockAuthBackend) and the HTTP backend are
//! interchangeable implementations selected by configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use accessgate_auth::Principal;

use crate::credential::{AccessToken, CredentialPair, RefreshToken};

/// Username/password login input.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl core::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Successful login: the principal plus a fresh credential pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    pub principal: Principal,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub expires_in_seconds: u64,
}

/// Successful refresh.
///
/// `refresh_token` is absent when the backend keeps the current one.
/// `principal` is present when the refreshed credential carries updated claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshGrant {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    pub expires_in_seconds: u64,
    #[serde(default)]
    pub principal: Option<Principal>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused the request (bad password, revoked refresh token).
    #[error("rejected by backend: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with something that does not fit the contract.
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, BackendError>;

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<RefreshGrant, BackendError>;

    /// Remote logout. Callers ignore the outcome beyond logging it.
    async fn logout(&self, credential: &CredentialPair) -> Result<(), BackendError>;

    /// Principal owning `access_token`; used to resume a persisted session.
    async fn current_principal(&self, access_token: &AccessToken) -> Result<Principal, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_grant_uses_camel_case_wire_names() {
        let json = r#"{
            "principal": {"id": "1", "username": "ann", "roles": ["viewer"]},
            "accessToken": "at",
            "refreshToken": "rt",
            "expiresInSeconds": 900
        }"#;

        let grant: LoginGrant = serde_json::from_str(json).unwrap();
        assert_eq!(grant.access_token.expose(), "at");
        assert_eq!(grant.refresh_token.expose(), "rt");
        assert_eq!(grant.expires_in_seconds, 900);
        assert_eq!(grant.principal.username, "ann");
    }

    #[test]
    fn refresh_grant_optional_fields_default_to_none() {
        let grant: RefreshGrant =
            serde_json::from_str(r#"{"accessToken": "at2", "expiresInSeconds": 60}"#).unwrap();
        assert!(grant.refresh_token.is_none());
        assert!(grant.principal.is_none());
    }

    #[test]
    fn login_request_debug_hides_password() {
        let dbg = format!("{:?}", LoginRequest::new("ann", "hunter2"));
        assert!(!dbg.contains("hunter2"));
    }
}
