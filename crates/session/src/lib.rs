//! Session and credential lifecycle for the access gate.
//!
//! A single [`SessionManager`] per process owns login, logout and refresh, and
//! is the only writer of the [`TokenStore`]. Around it:
//!
//! - [`RequestAuthorizer`] attaches the current credential to outbound
//!   operations and performs the one refresh-and-retry on rejection.
//! - [`AccessGuard`] and [`ConditionalRenderer`] turn the live session into
//!   access decisions for navigation targets and UI fragments.
//! - [`AuthBackend`] is the boundary to the credential issuer; the mock and
//!   HTTP implementations are picked by [`SessionConfig`].

pub mod authorizer;
pub mod backend;
pub mod config;
pub mod credential;
pub mod error;
pub mod guard;
#[cfg(feature = "http")]
pub mod http;
pub mod manager;
pub mod mock;
pub mod queue;
pub mod render;
pub mod sqlite_store;
pub mod state;
pub mod token_store;

pub use authorizer::{AuthorizedError, CredentialRejection, RequestAuthorizer, StatusFailure};
pub use backend::{AuthBackend, BackendError, LoginGrant, LoginRequest, RefreshGrant};
pub use config::{
    BackendKind, ConfigError, SessionConfig, StorageKind, build_backend, build_session,
    build_token_store, load_role_catalog,
};
pub use credential::{AccessToken, CredentialError, CredentialPair, RefreshToken};
pub use error::{SessionError, SessionResult};
pub use guard::AccessGuard;
#[cfg(feature = "http")]
pub use http::HttpAuthBackend;
pub use manager::{RequestCredential, SessionManager, SessionOptions};
pub use mock::MockAuthBackend;
pub use queue::{Release, ReplayTurn};
pub use render::ConditionalRenderer;
pub use sqlite_store::{SqliteTokenStore, default_store_path};
pub use state::{SessionPhase, SessionSnapshot};
pub use token_store::{InMemoryTokenStore, StoreError, TokenStore};
