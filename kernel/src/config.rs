// Store Configuration
//
// Selects and parameterizes the backend a store runs on.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Database file used when no path is configured.
pub const DEFAULT_DB_FILE: &str = "timetravel.db";

/// Store configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory, latest versions only.
    Volatile,

    /// In-memory with full history.
    History,

    /// Durable SQLite database with full history.
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        reset_on_start: bool,
    },
}

impl StoreConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            backend: BackendConfig::Sqlite {
                path: PathBuf::from(DEFAULT_DB_FILE),
                reset_on_start: false,
            },
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Point the configuration at a SQLite database, keeping the reset flag
    /// if SQLite was already selected.
    pub fn with_sqlite_path(self, path: impl Into<PathBuf>) -> Self {
        let reset_on_start = match self.backend {
            BackendConfig::Sqlite { reset_on_start, .. } => reset_on_start,
            _ => false,
        };
        Self {
            backend: BackendConfig::Sqlite {
                path: path.into(),
                reset_on_start,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sqlite_config() {
        let json = r#"
        {
          "backend": { "kind": "sqlite", "path": "data/records.db", "reset_on_start": true }
        }
        "#;

        let config = StoreConfig::from_json(json).unwrap();

        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("data/records.db"),
                reset_on_start: true,
            }
        );
    }

    #[test]
    fn reset_defaults_to_false() {
        let config =
            StoreConfig::from_json(r#"{ "backend": { "kind": "sqlite", "path": "x.db" } }"#).unwrap();
        assert!(matches!(config.backend, BackendConfig::Sqlite { reset_on_start: false, .. }));
    }

    #[test]
    fn parse_memory_configs() {
        let volatile = StoreConfig::from_json(r#"{ "backend": { "kind": "volatile" } }"#).unwrap();
        let history = StoreConfig::from_json(r#"{ "backend": { "kind": "history" } }"#).unwrap();

        assert_eq!(volatile.backend, BackendConfig::Volatile);
        assert_eq!(history.backend, BackendConfig::History);
    }

    #[test]
    fn db_override_replaces_memory_backend() {
        let config = StoreConfig {
            backend: BackendConfig::History,
        }
        .with_sqlite_path("other.db");

        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("other.db"),
                reset_on_start: false,
            }
        );
    }
}
