//! Runtime configuration and component wiring.
//!
//! | Variable                          | Default                             |
//! |-----------------------------------|-------------------------------------|
//! | `ACCESSGATE_BACKEND`              | `mock` (`mock` or `http`)           |
//! | `ACCESSGATE_API_URL`              | `http://localhost:8080`             |
//! | `ACCESSGATE_STORAGE`              | `memory` (`memory` or `sqlite`)     |
//! | `ACCESSGATE_STORAGE_PATH`         | `{data_dir}/accessgate/session.db`  |
//! | `ACCESSGATE_NAMESPACE`            | `accessgate.session`                |
//! | `ACCESSGATE_REFRESH_LEEWAY_SECS`  | `0`                                 |
//! | `ACCESSGATE_ROLE_CATALOG`         | unset (JSON file of role definitions) |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use accessgate_auth::RoleCatalog;

use crate::backend::AuthBackend;
use crate::manager::{SessionManager, SessionOptions};
use crate::mock::MockAuthBackend;
use crate::sqlite_store::{SqliteTokenStore, default_store_path};
use crate::token_store::{InMemoryTokenStore, TokenStore};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_NAMESPACE: &str = "accessgate.session";

const MAX_LEEWAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} (expected {expected})")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("ACCESSGATE_BACKEND=http requires the `http` feature")]
    HttpFeatureDisabled,

    #[error("cannot resolve a default storage path: {0}")]
    StoragePath(String),

    #[error("cannot load role catalog from {path}: {reason}")]
    RoleCatalog { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-memory dev-mode backend with the demo users.
    #[default]
    Mock,
    Http,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "dev" => Ok(BackendKind::Mock),
            "http" => Ok(BackendKind::Http),
            _ => Err(ConfigError::InvalidValue {
                var: "ACCESSGATE_BACKEND",
                value: s.to_string(),
                expected: "mock|http",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "sqlite" => Ok(StorageKind::Sqlite),
            _ => Err(ConfigError::InvalidValue {
                var: "ACCESSGATE_STORAGE",
                value: s.to_string(),
                expected: "memory|sqlite",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub backend: BackendKind,
    pub api_url: String,
    pub storage: StorageKind,
    /// `None` resolves to [`default_store_path`] when the store is built.
    pub storage_path: Option<PathBuf>,
    pub namespace: String,
    pub refresh_leeway_secs: u64,
    /// JSON array of roles used to resolve bare role names.
    pub role_catalog_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            api_url: DEFAULT_API_URL.to_string(),
            storage: StorageKind::default(),
            storage_path: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            refresh_leeway_secs: 0,
            role_catalog_path: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or blank variables take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("ACCESSGATE_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = get("ACCESSGATE_API_URL") {
            config.api_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = get("ACCESSGATE_STORAGE") {
            config.storage = v.parse()?;
        }
        if let Some(v) = get("ACCESSGATE_STORAGE_PATH") {
            config.storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ACCESSGATE_NAMESPACE") {
            config.namespace = v;
        }
        if let Some(v) = get("ACCESSGATE_REFRESH_LEEWAY_SECS") {
            config.refresh_leeway_secs =
                v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: "ACCESSGATE_REFRESH_LEEWAY_SECS",
                    value: v.clone(),
                    expected: "a non-negative number of seconds",
                })?;
        }

        if let Some(v) = get("ACCESSGATE_ROLE_CATALOG") {
            config.role_catalog_path = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    /// Capped at one day.
    pub fn refresh_leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_leeway_secs.min(MAX_LEEWAY_SECS) as i64)
    }
}

pub fn build_backend(config: &SessionConfig) -> Result<Arc<dyn AuthBackend>, ConfigError> {
    match config.backend {
        BackendKind::Mock => {
            tracing::info!("using dev-mode mock authentication backend");
            Ok(Arc::new(MockAuthBackend::with_demo_users()))
        }
        #[cfg(feature = "http")]
        BackendKind::Http => {
            tracing::info!(api_url = %config.api_url, "using HTTP authentication backend");
            Ok(Arc::new(crate::http::HttpAuthBackend::new(config.api_url.clone())))
        }
        #[cfg(not(feature = "http"))]
        BackendKind::Http => Err(ConfigError::HttpFeatureDisabled),
    }
}

pub fn build_token_store(config: &SessionConfig) -> Result<Arc<dyn TokenStore>, ConfigError> {
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(InMemoryTokenStore::new())),
        StorageKind::Sqlite => {
            let path = match &config.storage_path {
                Some(path) => path.clone(),
                None => default_store_path().map_err(|err| ConfigError::StoragePath(format!("{err:#}")))?,
            };
            tracing::info!(path = %path.display(), namespace = %config.namespace, "using sqlite token store");
            Ok(Arc::new(SqliteTokenStore::new(path, config.namespace.clone())))
        }
    }
}

pub fn load_role_catalog(path: &Path) -> Result<RoleCatalog, ConfigError> {
    let failed = |reason: String| ConfigError::RoleCatalog {
        path: path.to_path_buf(),
        reason,
    };
    let json = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
    let catalog = RoleCatalog::from_json(&json).map_err(|e| failed(e.to_string()))?;
    tracing::info!(path = %path.display(), roles = catalog.len(), "loaded role catalog");
    Ok(catalog)
}

/// Backend, store and manager wired from `config`.
pub fn build_session(config: &SessionConfig) -> Result<SessionManager, ConfigError> {
    let backend = build_backend(config)?;
    let store = build_token_store(config)?;
    let role_catalog = config
        .role_catalog_path
        .as_deref()
        .map(load_role_catalog)
        .transpose()?;

    Ok(SessionManager::with_options(
        backend,
        store,
        SessionOptions {
            refresh_leeway: config.refresh_leeway(),
            role_catalog,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.namespace, "accessgate.session");
        assert_eq!(config.refresh_leeway(), chrono::Duration::zero());
    }

    #[test]
    fn reads_every_variable() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("ACCESSGATE_BACKEND", "HTTP"),
            ("ACCESSGATE_API_URL", "https://auth.example.test/"),
            ("ACCESSGATE_STORAGE", "sqlite"),
            ("ACCESSGATE_STORAGE_PATH", "/tmp/s.db"),
            ("ACCESSGATE_NAMESPACE", "tenant-a"),
            ("ACCESSGATE_REFRESH_LEEWAY_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.backend, BackendKind::Http);
        assert_eq!(config.api_url, "https://auth.example.test");
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/s.db")));
        assert_eq!(config.namespace, "tenant-a");
        assert_eq!(config.refresh_leeway(), chrono::Duration::seconds(30));
    }

    #[test]
    fn rejects_unknown_values() {
        let err = SessionConfig::from_lookup(lookup(&[("ACCESSGATE_STORAGE", "redis")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "ACCESSGATE_STORAGE", .. }));

        let err = SessionConfig::from_lookup(lookup(&[("ACCESSGATE_REFRESH_LEEWAY_SECS", "-5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[("ACCESSGATE_BACKEND", "  ")])).unwrap();
        assert_eq!(config.backend, BackendKind::Mock);
    }

    #[cfg(not(feature = "http"))]
    #[test]
    fn http_backend_needs_the_feature() {
        let config = SessionConfig {
            backend: BackendKind::Http,
            ..SessionConfig::default()
        };
        assert_eq!(build_backend(&config).err(), Some(ConfigError::HttpFeatureDisabled));
    }

    #[test]
    fn role_catalog_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        std::fs::write(&path, r#"[{"name": "auditor", "permissions": ["*:read"]}]"#).unwrap();

        let catalog = load_role_catalog(&path).unwrap();
        assert!(catalog.get("auditor").is_some());

        let missing = load_role_catalog(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::RoleCatalog { .. }));
    }

    #[tokio::test]
    async fn builds_a_working_sqlite_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            storage: StorageKind::Sqlite,
            storage_path: Some(dir.path().join("session.db")),
            ..SessionConfig::default()
        };

        let session = build_session(&config).unwrap();
        assert!(session.current_principal().is_none());
    }
}
