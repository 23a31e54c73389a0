//! Durable store configuration.

use serde::{Deserialize, Serialize};

/// Store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite settings.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file; parent directories are created on open.
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

fn default_path() -> String {
    "data/app.db".to_string()
}
