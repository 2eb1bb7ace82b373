//! Session lifecycle error model.

use thiserror::Error;

/// Result type used across the session layer.
pub type SessionResult<T> = Result<T, SessionError>;

/// Credential-lifecycle failure.
///
/// Access *denials* are not errors; see [`accessgate_auth::AccessDecision`].
///
/// Storage failures never show up here: the store reports them as
/// [`StoreError`](crate::StoreError), the manager logs them, and an unreadable
/// store reads as "no session", which callers see as [`Unauthenticated`].
///
/// [`Unauthenticated`]: SessionError::Unauthenticated
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Login rejected by the backend. User-correctable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No session, or the session was closed while the caller waited.
    #[error("not authenticated")]
    Unauthenticated,

    /// The refresh attempt failed; the session is over.
    #[error("session expired")]
    SessionExpired,

    /// The authentication backend could not be reached or answered garbage.
    #[error("authentication backend error: {0}")]
    Backend(String),

    #[error("a session is already active; log out first")]
    AlreadyAuthenticated,

    #[error("a login is already in progress")]
    LoginInProgress,
}
