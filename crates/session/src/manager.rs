//! Session lifecycle state machine.
//!
//! ```text
//! Anonymous --login--> Authenticating --ok--> Authenticated --refresh--> Refreshing
//!     ^                     |                   ^    |                    |    |
//!     +------- failure -----+                   |    +--- logout ---+     |    |
//!     +------------------------------------------------- logout ----+-----+    |
//!                                               +------- ok ------------------+|
//! Expired <------------------------------------------------ failure ----------+
//! Expired --login--> Authenticating
//! ```
//!
//! The manager is the only writer of the [`TokenStore`] and the only source of
//! the current principal. At most one refresh is in flight; callers asking for
//! a refresh while one is running are parked on its queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Utc};
use tokio::sync::{oneshot, watch};

use accessgate_auth::{Principal, RoleCatalog};

use crate::backend::{AuthBackend, BackendError, LoginRequest, RefreshGrant};
use crate::credential::{AccessToken, CredentialPair, RefreshToken};
use crate::error::{SessionError, SessionResult};
use crate::queue::{PendingQueue, Release, ReplayTurn};
use crate::state::{SessionPhase, SessionSnapshot};
use crate::token_store::TokenStore;

enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated {
        principal: Arc<Principal>,
        credential: CredentialPair,
    },
    Refreshing {
        principal: Arc<Principal>,
        credential: CredentialPair,
        pending: PendingQueue,
    },
    Expired,
}

struct Inner {
    state: SessionState,
    /// Bumped whenever a transition invalidates in-flight work (login start,
    /// refresh start, logout, expiry). Late results from an older epoch are
    /// discarded.
    epoch: u64,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        match &self.state {
            SessionState::Anonymous => SessionSnapshot::new(SessionPhase::Anonymous, None),
            SessionState::Authenticating => SessionSnapshot::new(SessionPhase::Authenticating, None),
            SessionState::Authenticated { principal, .. } => {
                SessionSnapshot::new(SessionPhase::Authenticated, Some(principal.clone()))
            }
            SessionState::Refreshing { principal, .. } => {
                SessionSnapshot::new(SessionPhase::Refreshing, Some(principal.clone()))
            }
            SessionState::Expired => SessionSnapshot::new(SessionPhase::Expired, None),
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn TokenStore>,
    /// Serializes store writes/clears against epoch checks.
    store_gate: tokio::sync::Mutex<()>,
    snapshots: watch::Sender<SessionSnapshot>,
    options: SessionOptions,
}

/// Tuning for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Refresh before sending when the credential expires within this window.
    /// Zero disables proactive refresh.
    pub refresh_leeway: Duration,
    /// Resolves roles that the backend delivers as bare names.
    pub role_catalog: Option<RoleCatalog>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_leeway: Duration::zero(),
            role_catalog: None,
        }
    }
}

/// Credential to use for one outgoing operation.
#[derive(Debug)]
pub struct RequestCredential {
    pub credential: CredentialPair,
    /// Present when the caller was parked behind a refresh.
    ///
    /// Await [`ReplayTurn::ready`] before sending and drop the turn as soon as
    /// the operation finishes: every caller released after this one waits on
    /// it, so a turn that is kept alive stalls them all.
    pub turn: Option<ReplayTurn>,
}

enum Ticket {
    Ready(CredentialPair),
    Parked(oneshot::Receiver<SessionResult<Release>>),
}

/// Process-wide session owner.
///
/// Cheap to clone; clones share one state machine. Create one at startup and
/// hand clones to the components that need it.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(backend: Arc<dyn AuthBackend>, store: Arc<dyn TokenStore>) -> Self {
        Self::with_options(backend, store, SessionOptions::default())
    }

    /// Like [`new`](Self::new), refreshing proactively when a credential is
    /// about to expire within `leeway`.
    pub fn with_refresh_leeway(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn TokenStore>,
        leeway: Duration,
    ) -> Self {
        let options = SessionOptions {
            refresh_leeway: leeway,
            ..SessionOptions::default()
        };
        Self::with_options(backend, store, options)
    }

    pub fn with_options(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn TokenStore>,
        options: SessionOptions,
    ) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::anonymous());
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Anonymous,
                    epoch: 0,
                }),
                backend,
                store,
                store_gate: tokio::sync::Mutex::new(()),
                snapshots,
                options,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.shared.snapshots.send_replace(inner.snapshot());
    }

    fn admit(&self, principal: Principal) -> Arc<Principal> {
        match &self.shared.options.role_catalog {
            Some(catalog) => Arc::new(principal.resolve_roles(catalog)),
            None => Arc::new(principal),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.snapshot().phase()
    }

    /// Principal of an `Authenticated`/`Refreshing` session; `None` means
    /// "not authorized for anything".
    pub fn current_principal(&self) -> Option<Arc<Principal>> {
        self.snapshot().principal_arc()
    }

    /// Receiver that sees a new snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Login / resume / logout
    // ─────────────────────────────────────────────────────────────────────

    /// Authenticate with the backend and commit the resulting credential.
    ///
    /// Accepted from `Anonymous` and `Expired` only.
    pub async fn login(&self, request: LoginRequest) -> SessionResult<Arc<Principal>> {
        let epoch = self.begin_authenticating()?;
        tracing::info!(username = %request.username, "login started");

        // Driven on its own task so a dropped caller cannot strand the session
        // in `Authenticating`.
        let this = self.clone();
        tokio::spawn(async move { this.complete_login(epoch, request).await })
            .await
            .map_err(|err| SessionError::Backend(format!("login task failed: {err}")))?
    }

    fn begin_authenticating(&self) -> SessionResult<u64> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Anonymous | SessionState::Expired => {}
            SessionState::Authenticating => return Err(SessionError::LoginInProgress),
            SessionState::Authenticated { .. } | SessionState::Refreshing { .. } => {
                return Err(SessionError::AlreadyAuthenticated);
            }
        }
        inner.state = SessionState::Authenticating;
        inner.epoch += 1;
        self.publish(&inner);
        Ok(inner.epoch)
    }

    async fn complete_login(&self, epoch: u64, request: LoginRequest) -> SessionResult<Arc<Principal>> {
        let grant = match self.shared.backend.login(&request).await {
            Ok(grant) => grant,
            Err(err) => {
                self.abandon_authenticating(epoch);
                tracing::warn!(username = %request.username, error = %err, "login failed");
                return Err(match err {
                    BackendError::Rejected(_) => SessionError::InvalidCredentials,
                    other => SessionError::Backend(other.to_string()),
                });
            }
        };

        let credential = match CredentialPair::issued(
            grant.access_token,
            grant.refresh_token,
            grant.expires_in_seconds,
            Utc::now(),
        ) {
            Ok(credential) => credential,
            Err(err) => {
                self.abandon_authenticating(epoch);
                tracing::warn!(error = %err, "login returned an unusable credential");
                return Err(SessionError::Backend(err.to_string()));
            }
        };

        let principal = self.admit(grant.principal);
        if !self.commit_authenticated(epoch, principal.clone(), credential.clone()) {
            tracing::info!("login result discarded; session was closed meanwhile");
            return Err(SessionError::Unauthenticated);
        }

        self.persist(epoch, &credential).await;
        tracing::info!(principal = %principal.id, "login succeeded");
        Ok(principal)
    }

    /// `Authenticating -> Authenticated`, if `epoch` is still current.
    fn commit_authenticated(
        &self,
        epoch: u64,
        principal: Arc<Principal>,
        credential: CredentialPair,
    ) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch || !matches!(inner.state, SessionState::Authenticating) {
            return false;
        }
        inner.state = SessionState::Authenticated {
            principal,
            credential,
        };
        self.publish(&inner);
        true
    }

    /// `Authenticating -> Anonymous`, if `epoch` is still current.
    fn abandon_authenticating(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch && matches!(inner.state, SessionState::Authenticating) {
            inner.state = SessionState::Anonymous;
            self.publish(&inner);
        }
    }

    /// Restore a persisted session at startup.
    ///
    /// A locally expired access token is refreshed first (one attempt); the
    /// principal is then fetched from the backend. A rejected or unusable
    /// stored credential is cleared and the session stays `Anonymous`. An
    /// unreachable backend leaves the store untouched and reports the error.
    pub async fn resume(&self) -> SessionResult<Option<Arc<Principal>>> {
        {
            let inner = self.lock();
            if !matches!(inner.state, SessionState::Anonymous) {
                return Ok(inner.snapshot().principal_arc());
            }
        }
        let epoch = self.begin_authenticating()?;

        let this = self.clone();
        tokio::spawn(async move { this.complete_resume(epoch).await })
            .await
            .map_err(|err| SessionError::Backend(format!("resume task failed: {err}")))?
    }

    async fn complete_resume(&self, epoch: u64) -> SessionResult<Option<Arc<Principal>>> {
        let Some(stored) = self.shared.store.read().await else {
            self.abandon_authenticating(epoch);
            return Ok(None);
        };

        let mut refreshed_principal = None;
        let mut refreshed = false;
        let credential = if stored.is_expired_at(Utc::now()) {
            tracing::info!("stored access token expired; refreshing before resume");
            match self.shared.backend.refresh(stored.refresh_token()).await {
                Ok(grant) => match credential_from_refresh(grant, stored.refresh_token()) {
                    Ok((credential, principal)) => {
                        refreshed_principal = principal;
                        refreshed = true;
                        credential
                    }
                    Err(err) => return self.discard_stored(epoch, err).await,
                },
                Err(err) => return self.resume_failed(epoch, err).await,
            }
        } else {
            stored
        };

        let principal = match refreshed_principal {
            Some(principal) => principal,
            None => match self
                .shared
                .backend
                .current_principal(credential.access_token())
                .await
            {
                Ok(principal) => principal,
                Err(err) => return self.resume_failed(epoch, err).await,
            },
        };

        let principal = self.admit(principal);
        if !self.commit_authenticated(epoch, principal.clone(), credential.clone()) {
            return Ok(None);
        }
        if refreshed {
            self.persist(epoch, &credential).await;
        }
        tracing::info!(principal = %principal.id, "session resumed");
        Ok(Some(principal))
    }

    async fn resume_failed(
        &self,
        epoch: u64,
        err: BackendError,
    ) -> SessionResult<Option<Arc<Principal>>> {
        match err {
            BackendError::Transport(msg) => {
                self.abandon_authenticating(epoch);
                tracing::warn!(error = %msg, "backend unreachable; stored session kept for later");
                Err(SessionError::Backend(msg))
            }
            other => self.discard_stored(epoch, other).await,
        }
    }

    async fn discard_stored(
        &self,
        epoch: u64,
        err: impl core::fmt::Display,
    ) -> SessionResult<Option<Arc<Principal>>> {
        tracing::info!(error = %err, "stored session rejected; clearing");
        self.clear_store(epoch).await;
        self.abandon_authenticating(epoch);
        Ok(None)
    }

    /// End the session locally. Always succeeds; the backend is told on a
    /// best-effort basis.
    ///
    /// Callers parked on an in-flight refresh are released with
    /// [`SessionError::SessionExpired`].
    pub async fn logout(&self) {
        // Held across the transition so no write from the old session lands
        // after the clear, and no newer session's write lands before it.
        let gate = self.shared.store_gate.lock().await;
        let (credential, pending) = {
            let mut inner = self.lock();
            let previous = std::mem::replace(&mut inner.state, SessionState::Anonymous);
            let (credential, pending) = match previous {
                SessionState::Authenticated { credential, .. } => (Some(credential), None),
                SessionState::Refreshing {
                    credential,
                    pending,
                    ..
                } => (Some(credential), Some(pending)),
                SessionState::Expired => {
                    inner.state = SessionState::Expired;
                    (None, None)
                }
                SessionState::Anonymous | SessionState::Authenticating => (None, None),
            };
            inner.epoch += 1;
            self.publish(&inner);
            (credential, pending)
        };

        if let Some(pending) = pending {
            tracing::info!(waiters = pending.len(), "logout cancels pending refresh waiters");
            pending.fail(SessionError::SessionExpired);
        }

        self.clear_gated().await;
        drop(gate);

        if let Some(credential) = credential {
            if let Err(err) = self.shared.backend.logout(&credential).await {
                tracing::warn!(error = %err, "remote logout failed; local session cleared anyway");
            }
        }

        tracing::info!("logged out");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Refresh
    // ─────────────────────────────────────────────────────────────────────

    /// Refresh the credential, joining the in-flight refresh if there is one.
    pub async fn refresh(&self) -> SessionResult<CredentialPair> {
        let ticket = self.enqueue_refresh(None, SessionError::SessionExpired)?;
        let release = Self::redeem(ticket).await?;
        Ok(release.credential)
    }

    /// Credential for an outgoing operation.
    ///
    /// Waits for an in-flight refresh. Without a session this fails fast with
    /// [`SessionError::Unauthenticated`].
    pub async fn credential_for_request(&self) -> SessionResult<RequestCredential> {
        let leeway = self.shared.options.refresh_leeway;
        let (ticket, expiring) = {
            let mut inner = self.lock();
            match &mut inner.state {
                SessionState::Anonymous
                | SessionState::Authenticating
                | SessionState::Expired => return Err(SessionError::Unauthenticated),
                SessionState::Refreshing { pending, .. } => (Some(Ticket::Parked(pending.push())), None),
                SessionState::Authenticated { credential, .. } => {
                    if leeway > Duration::zero() && credential.expires_within(Utc::now(), leeway) {
                        (None, Some(credential.access_token().clone()))
                    } else {
                        (Some(Ticket::Ready(credential.clone())), None)
                    }
                }
            }
        };

        let ticket = match (ticket, expiring) {
            (Some(ticket), _) => ticket,
            (None, stale) => {
                tracing::debug!("credential inside refresh leeway; refreshing first");
                self.enqueue_refresh(stale.as_ref(), SessionError::Unauthenticated)?
            }
        };

        match ticket {
            Ticket::Ready(credential) => Ok(RequestCredential {
                credential,
                turn: None,
            }),
            parked => {
                let release = Self::redeem(parked).await?;
                Ok(RequestCredential {
                    credential: release.credential,
                    turn: Some(release.turn),
                })
            }
        }
    }

    /// Refresh after the backend rejected `used`.
    ///
    /// If the session already moved past `used` (another caller refreshed),
    /// the current credential is returned without a second refresh.
    pub async fn refresh_after_rejection(&self, used: &AccessToken) -> SessionResult<Release> {
        match self.enqueue_refresh(Some(used), SessionError::SessionExpired)? {
            Ticket::Ready(credential) => Ok(Release {
                credential,
                turn: ReplayTurn::detached(),
            }),
            parked => Self::redeem(parked).await,
        }
    }

    async fn redeem(ticket: Ticket) -> SessionResult<Release> {
        match ticket {
            Ticket::Ready(credential) => Ok(Release {
                credential,
                turn: ReplayTurn::detached(),
            }),
            // A dropped sender means the queue was torn down without a verdict.
            Ticket::Parked(rx) => rx.await.unwrap_or(Err(SessionError::SessionExpired)),
        }
    }

    /// Join the in-flight refresh or start one.
    ///
    /// With `stale` set, a session whose access token already differs is
    /// returned as-is instead of refreshing again. `expired` is the error
    /// reported when the session is already `Expired`.
    fn enqueue_refresh(
        &self,
        stale: Option<&AccessToken>,
        expired: SessionError,
    ) -> SessionResult<Ticket> {
        let (rx, epoch, refresh_token) = {
            let mut inner = self.lock();
            match &mut inner.state {
                SessionState::Anonymous | SessionState::Authenticating => {
                    return Err(SessionError::Unauthenticated);
                }
                SessionState::Expired => return Err(expired),
                SessionState::Refreshing { pending, .. } => {
                    let rx = pending.push();
                    tracing::debug!(waiters = pending.len(), "refresh in flight; caller queued");
                    return Ok(Ticket::Parked(rx));
                }
                SessionState::Authenticated { credential, .. } => {
                    if let Some(stale) = stale {
                        if credential.access_token() != stale {
                            return Ok(Ticket::Ready(credential.clone()));
                        }
                    }
                }
            }

            let (principal, credential) =
                match std::mem::replace(&mut inner.state, SessionState::Anonymous) {
                    SessionState::Authenticated {
                        principal,
                        credential,
                    } => (principal, credential),
                    other => {
                        inner.state = other;
                        return Err(SessionError::Unauthenticated);
                    }
                };

            let mut pending = PendingQueue::default();
            let rx = pending.push();
            let refresh_token = credential.refresh_token().clone();
            inner.state = SessionState::Refreshing {
                principal,
                credential,
                pending,
            };
            inner.epoch += 1;
            self.publish(&inner);
            (rx, inner.epoch, refresh_token)
        };

        tracing::info!("credential refresh started");
        let this = self.clone();
        tokio::spawn(async move { this.run_refresh(epoch, refresh_token).await });

        Ok(Ticket::Parked(rx))
    }

    async fn run_refresh(&self, epoch: u64, refresh_token: RefreshToken) {
        let outcome = self
            .shared
            .backend
            .refresh(&refresh_token)
            .await
            .map_err(|err| err.to_string())
            .and_then(|grant| {
                credential_from_refresh(grant, &refresh_token).map_err(|err| err.to_string())
            });

        match outcome {
            Ok((credential, claims)) => {
                let pending = {
                    let mut inner = self.lock();
                    if inner.epoch != epoch {
                        tracing::debug!("refresh result discarded; session changed meanwhile");
                        return;
                    }
                    let (principal, pending) =
                        match std::mem::replace(&mut inner.state, SessionState::Anonymous) {
                            SessionState::Refreshing {
                                principal, pending, ..
                            } => (principal, pending),
                            other => {
                                inner.state = other;
                                return;
                            }
                        };
                    let principal = match claims {
                        Some(claims) => self.admit(claims),
                        None => principal,
                    };
                    inner.state = SessionState::Authenticated {
                        principal,
                        credential: credential.clone(),
                    };
                    self.publish(&inner);
                    pending
                };

                self.persist(epoch, &credential).await;
                tracing::info!(waiters = pending.len(), "credential refreshed");
                pending.release(&credential);
            }
            Err(err) => {
                let gate = self.shared.store_gate.lock().await;
                let pending = {
                    let mut inner = self.lock();
                    if inner.epoch != epoch {
                        tracing::debug!("refresh failure discarded; session changed meanwhile");
                        return;
                    }
                    let pending = match std::mem::replace(&mut inner.state, SessionState::Expired) {
                        SessionState::Refreshing { pending, .. } => pending,
                        other => {
                            inner.state = other;
                            return;
                        }
                    };
                    inner.epoch += 1;
                    self.publish(&inner);
                    pending
                };

                tracing::warn!(error = %err, waiters = pending.len(), "refresh failed; session expired");
                self.clear_gated().await;
                drop(gate);
                pending.fail(SessionError::SessionExpired);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Store access
    // ─────────────────────────────────────────────────────────────────────

    /// Write `credential` unless a later transition superseded `epoch`.
    ///
    /// A failed write leaves the session usable in memory; it just will not
    /// survive a restart.
    async fn persist(&self, epoch: u64, credential: &CredentialPair) {
        let _gate = self.shared.store_gate.lock().await;
        let current = self.lock().epoch == epoch;
        if !current {
            return;
        }
        if let Err(err) = self.shared.store.write(credential).await {
            tracing::warn!(error = %err, "failed to persist credential; session kept in memory only");
        }
    }

    /// Clear the store unless a later transition superseded `epoch`; a newer
    /// session may already have persisted its own credential.
    async fn clear_store(&self, epoch: u64) {
        let _gate = self.shared.store_gate.lock().await;
        let current = self.lock().epoch == epoch;
        if !current {
            tracing::debug!("store clear skipped; session changed meanwhile");
            return;
        }
        self.clear_gated().await;
    }

    /// Caller holds `store_gate`.
    async fn clear_gated(&self) {
        if let Err(err) = self.shared.store.clear().await {
            tracing::warn!(error = %err, "failed to clear credential store");
        }
    }
}

fn credential_from_refresh(
    grant: RefreshGrant,
    current: &RefreshToken,
) -> Result<(CredentialPair, Option<Principal>), crate::credential::CredentialError> {
    let refresh_token = grant.refresh_token.unwrap_or_else(|| current.clone());
    let credential = CredentialPair::issued(
        grant.access_token,
        refresh_token,
        grant.expires_in_seconds,
        Utc::now(),
    )?;
    Ok((credential, grant.principal))
}
