//! HTTP implementation of [`AuthBackend`].
//!
//! Endpoints, relative to the configured API URL, JSON bodies in camelCase:
//!
//! - `POST /auth/login`    `{username, password}` -> [`LoginGrant`]
//! - `POST /auth/refresh`  `{refreshToken}`       -> [`RefreshGrant`]
//! - `POST /auth/logout`   `{refreshToken}` with the bearer access token
//! - `GET  /auth/me`       with the bearer access token -> principal

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use accessgate_auth::Principal;

use crate::backend::{AuthBackend, BackendError, LoginGrant, LoginRequest, RefreshGrant};
use crate::credential::{AccessToken, CredentialPair, RefreshToken};

#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    api_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

impl HttpAuthBackend {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(api_url, reqwest::Client::new())
    }

    pub fn with_client(api_url: impl Into<String>, client: reqwest::Client) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { api_url, client }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
        let resp = Self::check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(classify(status, text))
    }
}

/// 400/401/403 mean the backend refused the credential; everything else
/// unsuccessful is a transport-level problem.
fn classify(status: StatusCode, body: String) -> BackendError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Rejected(message)
        }
        _ => BackendError::Transport(message),
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, BackendError> {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        Self::read_json(resp).await
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<RefreshGrant, BackendError> {
        let resp = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshBody {
                refresh_token: refresh_token.expose(),
            })
            .send()
            .await
            .map_err(transport)?;
        Self::read_json(resp).await
    }

    async fn logout(&self, credential: &CredentialPair) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(credential.access_token().expose())
            .json(&RefreshBody {
                refresh_token: credential.refresh_token().expose(),
            })
            .send()
            .await
            .map_err(transport)?;
        Self::check_status(resp).await.map(|_| ())
    }

    async fn current_principal(&self, access_token: &AccessToken) -> Result<Principal, BackendError> {
        let resp = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(access_token.expose())
            .send()
            .await
            .map_err(transport)?;
        Self::read_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_refusals_are_rejections() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            assert!(matches!(classify(status, String::new()), BackendError::Rejected(_)));
        }
    }

    #[test]
    fn server_errors_are_transport_failures() {
        let err = classify(StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert_eq!(
            err,
            BackendError::Transport("503 Service Unavailable: down".into())
        );
    }

    #[test]
    fn trailing_slash_is_dropped_from_api_url() {
        let backend = HttpAuthBackend::new("http://localhost:8080/");
        assert_eq!(backend.url("/auth/me"), "http://localhost:8080/auth/me");
    }
}
