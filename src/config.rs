//! Harness configuration.
//!
//! Settings come from a `pgharness.toml` file and can be overridden from
//! the command line:
//!
//! ```toml
//! [postgres]
//! url = "postgres://localhost:5432/db"
//!
//! [bench]
//! sql = "SELECT col_varchar FROM latency_test WHERE col_bigint=$1"
//! operations = 1000
//! clients = 16
//! ```

use crate::error::{HarnessError, HarnessResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory and the user config dir.
pub const CONFIG_FILE: &str = "pgharness.toml";

/// Default statement for the latency sampler.
pub const DEFAULT_SQL: &str = "SELECT col_varchar FROM latency_test WHERE col_bigint=$1";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub postgres: PostgresConfig,

    #[serde(default)]
    pub bench: BenchConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL
    pub url: Option<String>,

    /// Pool size for ORM handles
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Latency sampler settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_sql")]
    pub sql: String,

    #[serde(default = "default_operations")]
    pub operations: usize,

    #[serde(default = "default_clients")]
    pub clients: usize,

    /// Upper bound (exclusive) of the random id bound to `$1`.
    #[serde(default = "default_id_space")]
    pub id_space: i64,

    pub seed: Option<u64>,
}

fn default_pool_size() -> u32 {
    4
}

fn default_sql() -> String {
    DEFAULT_SQL.to_string()
}

fn default_operations() -> usize {
    1000
}

fn default_clients() -> usize {
    16
}

fn default_id_space() -> i64 {
    100_000
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            sql: default_sql(),
            operations: default_operations(),
            clients: default_clients(),
            id_space: default_id_space(),
            seed: None,
        }
    }
}

impl HarnessConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        toml::from_str(content).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the configuration.
    ///
    /// An explicit path must exist. Without one, `pgharness.toml` in the
    /// working directory wins over the user config dir; if neither exists
    /// the defaults are returned.
    pub fn load(explicit: Option<&Path>) -> HarnessResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::discover() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("pgharness").join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    /// Replace the database URL when an override is given.
    pub fn with_url(mut self, url: Option<String>) -> Self {
        if url.is_some() {
            self.postgres.url = url;
        }
        self
    }

    /// The configured database URL.
    pub fn database_url(&self) -> HarnessResult<&str> {
        self.postgres.url.as_deref().ok_or_else(|| {
            HarnessError::Config(
                "no database URL. Use --url, set PGHARNESS_DATABASE_URL or add postgres.url to pgharness.toml"
                    .to_string(),
            )
        })
    }
}
