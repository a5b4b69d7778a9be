//! Configuration system.
//!
//! Hierarchical loading, later sources override earlier ones:
//! - `silo.toml` (checked-in defaults)
//! - `silo.local.toml` (git-ignored local overrides)
//! - environment variables (`SILO_*`, `__` as the section separator)
//!
//! ## Example
//!
//! ```toml
//! # silo.toml
//! [database]
//! data_directory = "/var/lib/silo/data"
//!
//! [query]
//! parallel_threads = 8
//! timeout_ms = 30000
//! ```
//!
//! ```bash
//! SILO_DATABASE__DATA_DIRECTORY=/custom/path
//! SILO_QUERY__PARALLEL_THREADS=4
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Root directory scanned for data version directories.
    pub data_directory: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            data_directory: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Size of the partition worker pool.
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,
    /// Per-query deadline; absent means unlimited.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_parallel_threads() -> usize {
    num_cpus::get()
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            parallel_threads: default_parallel_threads(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter, overridable with `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default file locations and environment.
    pub fn load() -> Result<Config, figment::Error> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("silo.toml"))
                .merge(Toml::file("silo.local.toml")),
        )
    }

    /// Load configuration from an explicit file plus the environment.
    pub fn load_from(path: &std::path::Path) -> Result<Config, figment::Error> {
        Self::from_figment(Figment::new().merge(Toml::file(path)))
    }

    fn from_figment(figment: Figment) -> Result<Config, figment::Error> {
        figment
            .merge(Env::prefixed("SILO_").split("__"))
            .extract()
    }
}
