//! Credential storage.
//!
//! A `TokenStore` is pure storage: it persists exactly one credential pair and
//! applies no policy. The [`SessionManager`](crate::SessionManager) is its only
//! writer.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::credential::CredentialPair;

/// Storage-medium failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable holder of the current credential pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist `credential`, replacing any previous one. All fields are
    /// written or none is.
    async fn write(&self, credential: &CredentialPair) -> Result<(), StoreError>;

    /// Load the stored credential.
    ///
    /// Storage failures and partial records read as `None`; callers then fall
    /// back to re-authentication.
    async fn read(&self) -> Option<CredentialPair>;

    /// Remove the stored credential.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory token store for tests/dev. Does not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    slot: RwLock<Option<CredentialPair>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a credential, e.g. to exercise resume.
    pub fn with_credential(credential: CredentialPair) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn write(&self, credential: &CredentialPair) -> Result<(), StoreError> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(credential.clone());
        Ok(())
    }

    async fn read(&self) -> Option<CredentialPair> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        Ok(())
    }
}
