//! Environment-driven configuration.
//!
//! | Variable | Values | Default |
//! |----------|--------|---------|
//! | `SOURCERER_STORE` | `memory`, `file`, `postgres` | `memory` |
//! | `SOURCERER_STORE_PATH` | path to the `.jsonl` log | `data/events.jsonl` |
//! | `DATABASE_URL` | Postgres connection string | required for `postgres` |
//! | `SOURCERER_LOG_FORMAT` | `json`, `pretty` | `pretty` |
//!
//! Unknown values fall back to the default with a warning; a missing
//! `DATABASE_URL` for the Postgres backend is an error.

use std::path::PathBuf;

use thiserror::Error;

use sourcerer_observability::LogFormat;

use crate::event_store::{
    EventStore, EventStoreError, FileEventStore, InMemoryEventStore, PostgresEventStore,
};

pub const DEFAULT_STORE_PATH: &str = "data/events.jsonl";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when SOURCERER_STORE=postgres")]
    MissingDatabaseUrl,
}

/// Which event log backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    File(PathBuf),
    Postgres(String),
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::File(_) => "file",
            StoreBackend::Postgres(_) => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcererConfig {
    pub store: StoreBackend,
    pub log_format: LogFormat,
}

impl Default for SourcererConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            log_format: LogFormat::default(),
        }
    }
}

impl SourcererConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match lookup("SOURCERER_STORE")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("file") => StoreBackend::File(
                lookup("SOURCERER_STORE_PATH")
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string())
                    .into(),
            ),
            Some("postgres") => StoreBackend::Postgres(
                lookup("DATABASE_URL")
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?,
            ),
            Some(other) => {
                tracing::warn!(
                    value = other,
                    "unknown SOURCERER_STORE, falling back to in-memory store"
                );
                StoreBackend::Memory
            }
        };

        let log_format = match lookup("SOURCERER_LOG_FORMAT") {
            None => LogFormat::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "unknown SOURCERER_LOG_FORMAT, using default");
                LogFormat::default()
            }),
        };

        Ok(Self { store, log_format })
    }

    /// Open the configured event log.
    ///
    /// Async because the Postgres backend connects its pool here.
    pub async fn open_store(&self) -> Result<Box<dyn EventStore>, EventStoreError> {
        tracing::info!(backend = self.store.name(), "opening event store");

        Ok(match &self.store {
            StoreBackend::Memory => Box::new(InMemoryEventStore::new()),
            StoreBackend::File(path) => Box::new(FileEventStore::open(path)?),
            StoreBackend::Postgres(url) => Box::new(PostgresEventStore::connect(url).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_memory_store() {
        let config = SourcererConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SourcererConfig::default());
    }

    #[test]
    fn file_store_uses_default_path() {
        let config = SourcererConfig::from_lookup(lookup(&[("SOURCERER_STORE", "file")])).unwrap();
        assert_eq!(config.store, StoreBackend::File(DEFAULT_STORE_PATH.into()));
    }

    #[test]
    fn file_store_path_override() {
        let config = SourcererConfig::from_lookup(lookup(&[
            ("SOURCERER_STORE", "FILE"),
            ("SOURCERER_STORE_PATH", "/tmp/ledger.jsonl"),
        ]))
        .unwrap();
        assert_eq!(config.store, StoreBackend::File("/tmp/ledger.jsonl".into()));
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = SourcererConfig::from_lookup(lookup(&[("SOURCERER_STORE", "postgres")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);

        let config = SourcererConfig::from_lookup(lookup(&[
            ("SOURCERER_STORE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/sourcerer"),
        ]))
        .unwrap();
        assert_eq!(
            config.store,
            StoreBackend::Postgres("postgres://localhost/sourcerer".to_string())
        );
    }

    #[test]
    fn unknown_values_fall_back() {
        let config = SourcererConfig::from_lookup(lookup(&[
            ("SOURCERER_STORE", "cassandra"),
            ("SOURCERER_LOG_FORMAT", "xml"),
        ]))
        .unwrap();
        assert_eq!(config, SourcererConfig::default());
    }

    #[test]
    fn json_log_format() {
        let config =
            SourcererConfig::from_lookup(lookup(&[("SOURCERER_LOG_FORMAT", "json")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn opens_memory_and_file_stores() {
        let store = SourcererConfig::default().open_store().await.unwrap();
        assert!(store.read_page(0, 10, &Default::default()).unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let config = SourcererConfig {
            store: StoreBackend::File(dir.path().join("events.jsonl")),
            log_format: LogFormat::Pretty,
        };
        let store = config.open_store().await.unwrap();
        assert!(store.get(1).is_err());
    }
}
