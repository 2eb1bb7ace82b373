//! Credential pair model (transport-agnostic).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! secret_token {
    ($t:ident, $label:literal) => {
        #[doc = concat!("Opaque ", $label, ". Redacted in `Debug` output.")]
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn new(token: impl Into<String>) -> Self {
                Self(token.into())
            }

            pub fn expose(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($t), "(<redacted>)"))
            }
        }
    };
}

secret_token!(AccessToken, "access token");
secret_token!(RefreshToken, "refresh token");

/// Upper bound on a backend-announced lifetime (ten years).
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("access token is empty")]
    EmptyAccessToken,

    #[error("refresh token is empty")]
    EmptyRefreshToken,
}

/// Access token, refresh token and the absolute expiry of the access token.
///
/// The access token and its expiry only exist together; a refresh may keep the
/// refresh token across several access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    expires_at: DateTime<Utc>,
}

impl CredentialPair {
    pub fn new(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        if access_token.is_empty() {
            return Err(CredentialError::EmptyAccessToken);
        }
        if refresh_token.is_empty() {
            return Err(CredentialError::EmptyRefreshToken);
        }
        Ok(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    /// Build from a relative lifetime as returned by the backend.
    pub fn issued(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        expires_in_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let secs = expires_in_seconds.min(MAX_LIFETIME_SECS) as i64;
        let expires_at = now
            .checked_add_signed(Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(access_token, refresh_token, expires_at)
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &RefreshToken {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Expired, or expiring within `leeway` of `now`. A leeway reaching past
    /// the representable range covers every expiry.
    pub fn expires_within(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        match now.checked_add_signed(leeway) {
            Some(deadline) => deadline >= self.expires_at,
            None => true,
        }
    }
}
