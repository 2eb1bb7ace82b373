//! SQLite-backed credential store (survives restarts).
//!
//! Layout: one row per field, keyed by `(namespace, field)`. The access token,
//! refresh token and expiry are independent rows; a read only counts as
//! present when all three exist and parse.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::credential::{AccessToken, CredentialPair, RefreshToken};
use crate::token_store::{StoreError, TokenStore};

const FIELD_ACCESS: &str = "access_token";
const FIELD_REFRESH: &str = "refresh_token";
const FIELD_EXPIRES: &str = "expires_at";

/// Credential store persisted in a local SQLite file.
///
/// Cheap to clone; clones share one lazily opened pool.
#[derive(Debug, Clone)]
pub struct SqliteTokenStore {
    path: PathBuf,
    namespace: String,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteTokenStore {
    /// The database is opened on first use.
    pub fn new(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn pool(&self) -> anyhow::Result<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create token store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("failed to open token store at {:?}", self.path))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credential_store (
                namespace  TEXT NOT NULL,
                field      TEXT NOT NULL,
                value      TEXT NOT NULL,
                PRIMARY KEY (namespace, field)
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create credential_store table")?;

        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn write_fields(&self, credential: &CredentialPair) -> anyhow::Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await.context("failed to begin credential write")?;

        let fields = [
            (FIELD_ACCESS, credential.access_token().expose().to_string()),
            (FIELD_REFRESH, credential.refresh_token().expose().to_string()),
            (FIELD_EXPIRES, credential.expires_at().to_rfc3339()),
        ];

        for (field, value) in fields {
            sqlx::query(
                r#"
                INSERT INTO credential_store (namespace, field, value)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(namespace, field)
                DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(&self.namespace)
            .bind(field)
            .bind(value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write credential field '{field}'"))?;
        }

        tx.commit().await.context("failed to commit credential write")?;
        Ok(())
    }

    async fn read_fields(&self) -> anyhow::Result<Option<CredentialPair>> {
        let pool = self.pool().await?;

        let rows = sqlx::query(
            r#"
            SELECT field, value
            FROM credential_store
            WHERE namespace = ?1
            "#,
        )
        .bind(&self.namespace)
        .fetch_all(&pool)
        .await
        .context("failed to read credential fields")?;

        let mut fields: HashMap<String, String> = HashMap::with_capacity(rows.len());
        for row in rows {
            fields.insert(row.try_get("field")?, row.try_get("value")?);
        }

        let (Some(access), Some(refresh), Some(expires)) = (
            fields.remove(FIELD_ACCESS),
            fields.remove(FIELD_REFRESH),
            fields.remove(FIELD_EXPIRES),
        ) else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires)
            .map(|dt| dt.with_timezone(&Utc))
            .context("invalid expires_at in credential_store")?;

        let credential =
            CredentialPair::new(AccessToken::new(access), RefreshToken::new(refresh), expires_at)
                .context("invalid credential in credential_store")?;

        Ok(Some(credential))
    }

    async fn clear_fields(&self) -> anyhow::Result<()> {
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            DELETE FROM credential_store
            WHERE namespace = ?1
            "#,
        )
        .bind(&self.namespace)
        .execute(&pool)
        .await
        .context("failed to clear credential fields")?;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn write(&self, credential: &CredentialPair) -> Result<(), StoreError> {
        self.write_fields(credential)
            .await
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))
    }

    async fn read(&self) -> Option<CredentialPair> {
        match self.read_fields().await {
            Ok(credential) => credential,
            Err(err) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    "credential store unreadable; treating as absent: {err:#}"
                );
                None
            }
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.clear_fields()
            .await
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))
    }
}

/// Resolve the default database path: `{app_data_dir}/accessgate/session.db`.
pub fn default_store_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("accessgate");
    path.push("session.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(tag: &str) -> CredentialPair {
        CredentialPair::new(
            AccessToken::new(format!("access-{tag}")),
            RefreshToken::new(format!("refresh-{tag}")),
            Utc::now() + Duration::minutes(15),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn round_trips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        let c = credential("1");

        let store = SqliteTokenStore::new(&path, "test.session");
        store.write(&c).await.unwrap();
        assert_eq!(store.read().await, Some(c.clone()));

        let reopened = SqliteTokenStore::new(&path, "test.session");
        assert_eq!(reopened.read().await, Some(c));
    }

    #[tokio::test]
    async fn clear_removes_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::new(dir.path().join("s.db"), "ns");

        store.write(&credential("2")).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.read().await, None);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.db");
        let a = SqliteTokenStore::new(&path, "a");
        let b = SqliteTokenStore::new(&path, "b");

        a.write(&credential("a")).await.unwrap();
        assert_eq!(b.read().await, None);
        b.clear().await.unwrap();
        assert!(a.read().await.is_some());
    }

    #[tokio::test]
    async fn partial_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenStore::new(dir.path().join("s.db"), "ns");
        store.write(&credential("3")).await.unwrap();

        let pool = store.pool().await.unwrap();
        sqlx::query("DELETE FROM credential_store WHERE field = 'refresh_token'")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(store.read().await, None);
    }

    #[tokio::test]
    async fn unusable_medium_degrades_to_absent() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be cannot be opened.
        let store = SqliteTokenStore::new(dir.path(), "ns");

        assert_eq!(store.read().await, None);
        assert!(store.write(&credential("4")).await.is_err());
    }
}
