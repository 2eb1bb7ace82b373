//! Attach/detect/refresh/retry wrapper around outbound operations.
//!
//! [`RequestAuthorizer::execute`] is transport-agnostic: the operation is any
//! async closure that takes the access token to attach. Its error type tells
//! the authorizer, through [`CredentialRejection`], whether a failure means
//! "this credential is no longer accepted" (refresh and retry once) or
//! anything else (passed through untouched).

use std::future::Future;

use thiserror::Error;

use crate::credential::AccessToken;
use crate::error::SessionError;
use crate::manager::{RequestCredential, SessionManager};

/// Classifies an operation failure.
pub trait CredentialRejection {
    /// True only for a server-signalled credential expiry/rejection. An
    /// authorization denial must return false; retrying cannot fix it.
    fn is_credential_rejected(&self) -> bool;
}

/// Failure of an authorized operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizedError<E> {
    /// The operation was not attempted, or its retry could not be, because of
    /// the session lifecycle.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The operation's own error, unchanged.
    #[error("{0}")]
    Operation(E),
}

impl<E> AuthorizedError<E> {
    pub fn session(&self) -> Option<&SessionError> {
        match self {
            AuthorizedError::Session(err) => Some(err),
            AuthorizedError::Operation(_) => None,
        }
    }

    pub fn operation(&self) -> Option<&E> {
        match self {
            AuthorizedError::Session(_) => None,
            AuthorizedError::Operation(err) => Some(err),
        }
    }
}

/// Status-coded failure as returned by an HTTP-like resource server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("status {status}: {message}")]
pub struct StatusFailure {
    pub status: u16,
    pub message: String,
}

impl StatusFailure {
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;

    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(Self::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Self::FORBIDDEN, message)
    }
}

impl CredentialRejection for StatusFailure {
    fn is_credential_rejected(&self) -> bool {
        self.status == Self::UNAUTHORIZED
    }
}

/// Runs operations with the session's current credential.
#[derive(Debug, Clone)]
pub struct RequestAuthorizer {
    session: SessionManager,
}

impl RequestAuthorizer {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Execute `operation` with the current access token.
    ///
    /// - Without a session, fails with [`SessionError::Unauthenticated`]
    ///   without calling `operation`.
    /// - While a refresh is in flight, waits for it and runs in arrival order.
    /// - On a credential rejection, refreshes (coalesced with any other
    ///   refresh) and calls `operation` exactly once more. A failed refresh
    ///   yields [`SessionError::SessionExpired`] and no retry.
    /// - Every other failure is returned as [`AuthorizedError::Operation`].
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, AuthorizedError<E>>
    where
        F: FnMut(AccessToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CredentialRejection,
    {
        let RequestCredential { credential, turn } = self.session.credential_for_request().await?;
        let used = credential.access_token().clone();

        let first = {
            let mut turn = turn;
            if let Some(turn) = turn.as_mut() {
                turn.ready().await;
            }
            operation(used.clone()).await
        };

        match first {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_credential_rejected() => return Err(AuthorizedError::Operation(err)),
            Err(_) => {}
        }

        tracing::debug!("credential rejected; refreshing before retry");
        let mut release = self.session.refresh_after_rejection(&used).await?;

        release.turn.ready().await;
        let retried = operation(release.credential.access_token().clone()).await;
        // The turn is held until the replay has finished.
        drop(release);

        retried.map_err(AuthorizedError::Operation)
    }
}
