//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (INTENTSQL_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [database]
//! host = "db.internal"
//! dbname = "analytics"
//! schema = "reporting"
//!
//! [execution]
//! query_timeout_ms = 60000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! INTENTSQL_DATABASE__PASSWORD=secret
//! INTENTSQL_EXECUTION__QUERY_TIMEOUT_MS=10000
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "INTENTSQL_";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the target database
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Applied as the connection's `search_path`
    #[serde(default = "default_schema")]
    pub schema: String,

    /// 0 = driver default
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dbname", &self.dbname)
            .field("schema", &self.schema)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Query execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Caller-side wait bound per intent, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// LIMIT used when none (or a non-positive one) is given
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Upper clamp for any requested LIMIT
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,

    /// Rows sampled by table-summary
    #[serde(default = "default_sample_rows")]
    pub sample_rows: i64,
}

impl ExecutionConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Schema catalog caching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Entry lifetime in seconds. 0 = until restart or explicit refresh.
    #[serde(default)]
    pub ttl_secs: u64,
}

impl CatalogConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

/// Session default/history store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// History entries kept per session (oldest dropped first)
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

/// Table and column names of the pre-declared entity chain:
/// entities ← units ← observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub entity_table: String,
    pub entity_id: String,
    pub entity_name: String,

    pub unit_table: String,
    pub unit_id: String,
    /// Foreign key to `entity_table.entity_id`
    pub unit_entity: String,
    pub unit_name: String,

    pub observation_table: String,
    /// Foreign key to `unit_table.unit_id`
    pub observation_unit: String,
    pub variable: String,
    pub value: String,
    pub date: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        DomainConfig {
            entity_table: "entities".to_string(),
            entity_id: "ent_id".to_string(),
            entity_name: "company_name".to_string(),
            unit_table: "units".to_string(),
            unit_id: "unit_id".to_string(),
            unit_entity: "ent_id".to_string(),
            unit_name: "unit_name".to_string(),
            observation_table: "observations".to_string(),
            observation_unit: "unit_id".to_string(),
            variable: "variable".to_string(),
            value: "value".to_string(),
            date: "ref_date".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file; stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_user() -> String {
    "postgres".to_string()
}
fn default_dbname() -> String {
    "postgres".to_string()
}
fn default_schema() -> String {
    "public".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_query_timeout_ms() -> u64 {
    30_000
}
fn default_limit() -> i64 {
    5
}
fn default_max_limit() -> i64 {
    1000
}
fn default_sample_rows() -> i64 {
    3
}
fn default_session_ttl() -> u64 {
    86400
} // 24 hours
fn default_max_history() -> usize {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (INTENTSQL_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            dbname: default_dbname(),
            schema: default_schema(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            query_timeout_ms: default_query_timeout_ms(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            sample_rows: default_sample_rows(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ttl_secs: default_session_ttl(),
            max_history: default_max_history(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}
