//! Configuration handling.
//!
//! This module provides:
//! - `DbConfig`, the per-name connection record with its defaulting rules
//! - `ConfigSet`, the mapping from logical connection name to `DbConfig`, loaded from YAML
//! - `Config`, the command line options of the `db-access` binary

use crate::db::mapper::NamingConvention;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_DRIVER: &str = "mysql";
pub const DEFAULT_DSN: &str = "username:password@tcp(127.0.0.1:3306)/undefined?charset=utf8";
pub const DEFAULT_MAPPER: &str = "snake";
pub const DEFAULT_MAX_IDLE: u32 = 2;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 60;
pub const DEFAULT_MAX_OPEN: u32 = 50;

/// Logical name used when callers do not name a connection.
pub const DEFAULT_CONNECTION_NAME: &str = "db";

/// Files probed by [`ConfigSet::scan`], in order.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["config/db.yaml", "../config/db.yaml"];

/// `user:pass@tcp(host)/schema...`, as written for the go-sql-driver family.
static DSN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([_a-zA-Z0-9-.]+):(\S+)@tcp\(([^)]+)\)/([_a-zA-Z0-9-.]+)(\?\S*)?")
        .expect("DSN pattern is a valid regex")
});

/// Connection record for one logical name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub driver: String,
    /// First entry is the master, the rest are slaves.
    #[serde(deserialize_with = "one_or_many")]
    pub dsn: Vec<String>,
    pub enable_session_id: bool,
    pub show_sql: bool,
    /// `snake`, `gonic`, anything else is identity.
    pub mapper: String,
    pub max_idle: u32,
    /// Seconds
    pub max_lifetime: u64,
    pub max_open: u32,

    #[serde(skip)]
    naming: NamingConvention,
    #[serde(skip)]
    lifetime: Duration,
    #[serde(skip)]
    username: String,
    #[serde(skip)]
    hostname: String,
    #[serde(skip)]
    schema: String,
}

impl DbConfig {
    /// Create a record with the given driver and data sources, already normalized.
    pub fn new<I, S>(driver: impl Into<String>, dsn: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self {
            driver: driver.into(),
            dsn: dsn.into_iter().map(Into::into).collect(),
            ..Self::default()
        };
        config.normalize();
        config
    }

    /// The record used for the fallback connection group.
    pub fn fallback() -> Self {
        Self::new(DEFAULT_DRIVER, [DEFAULT_DSN])
    }

    /// Fill unset fields with defaults and compute the derived fields.
    ///
    /// Safe to call any number of times; the second call changes nothing.
    pub fn normalize(&mut self) -> &mut Self {
        if self.driver.is_empty() {
            self.driver = DEFAULT_DRIVER.to_string();
        }
        if self.mapper.is_empty() {
            self.mapper = DEFAULT_MAPPER.to_string();
        }
        self.mapper = self.mapper.to_lowercase();
        if self.max_idle == 0 {
            self.max_idle = DEFAULT_MAX_IDLE;
        }
        if self.max_lifetime == 0 {
            self.max_lifetime = DEFAULT_MAX_LIFETIME_SECS;
        }
        if self.max_open == 0 {
            self.max_open = DEFAULT_MAX_OPEN;
        }

        self.lifetime = Duration::from_secs(self.max_lifetime);
        self.naming = NamingConvention::from_name(&self.mapper);
        self.parse_source_name();
        self
    }

    pub fn naming(&self) -> NamingConvention {
        self.naming
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Username parsed from the first data source; empty when it did not match.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Resolve the configured driver.
    pub fn database_type(&self) -> DbResult<DatabaseType> {
        DatabaseType::from_driver(&self.driver).ok_or_else(|| {
            DbError::configuration(format!("unsupported driver '{}'", self.driver))
        })
    }

    /// Convert every data source into a URL the sqlx drivers accept.
    ///
    /// Blank entries are skipped. An empty result is an error.
    pub fn connection_urls(&self) -> DbResult<Vec<String>> {
        let db_type = self.database_type()?;
        let urls = self
            .dsn
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| dsn_to_url(db_type, s))
            .collect::<DbResult<Vec<_>>>()?;

        if urls.is_empty() {
            return Err(DbError::configuration("no data source configured"));
        }
        Ok(urls)
    }

    /// Only the first entry is considered, even when it is blank.
    fn parse_source_name(&mut self) {
        let Some(first) = self.dsn.first() else {
            return;
        };
        if let Some(caps) = DSN_PATTERN.captures(first.trim()) {
            self.username = caps[1].to_string();
            self.hostname = caps[3].to_string();
            self.schema = caps[4].to_string();
        }
    }
}

/// Rewrite a go-style DSN into a URL; URLs pass through unchanged.
fn dsn_to_url(db_type: DatabaseType, dsn: &str) -> DbResult<String> {
    if DatabaseType::from_connection_string(dsn).is_some() {
        return Ok(dsn.to_string());
    }

    if let Some(caps) = DSN_PATTERN.captures(dsn) {
        let mut url = Url::parse(&format!("{}://{}/{}", db_type.scheme(), &caps[3], &caps[4]))
            .map_err(|e| DbError::invalid_input(format!("Invalid data source host: {e}")))?;
        url.set_username(&caps[1])
            .and_then(|_| url.set_password(Some(&caps[2])))
            .map_err(|_| DbError::invalid_input("Data source cannot carry credentials"))?;
        if let Some(query) = caps.get(5) {
            url.set_query(Some(query.as_str().trim_start_matches('?')));
        }
        return Ok(url.to_string());
    }

    if db_type == DatabaseType::SQLite {
        return Ok(format!("sqlite:{dsn}"));
    }

    Err(DbError::invalid_input(format!(
        "Unrecognized data source format for {}",
        db_type
    )))
}

/// Accept `dsn: "..."` as well as `dsn: ["...", "..."]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Mapping from logical connection name to its record.
#[derive(Debug, Clone, Default)]
pub struct ConfigSet {
    configs: HashMap<String, DbConfig>,
}

impl ConfigSet {
    /// Build from already-parsed records, normalizing each one.
    pub fn from_map(mut configs: HashMap<String, DbConfig>) -> Self {
        for config in configs.values_mut() {
            config.normalize();
        }
        Self { configs }
    }

    /// Parse a YAML document of the form `name: { driver, dsn, ... }`.
    pub fn from_yaml_str(yaml: &str) -> DbResult<Self> {
        let configs: HashMap<String, DbConfig> = serde_yaml::from_str(yaml)
            .map_err(|e| DbError::configuration(format!("invalid YAML: {e}")))?;
        Ok(Self::from_map(configs))
    }

    /// Load one YAML file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Probe [`CONFIG_SEARCH_PATHS`] and use the first file that loads.
    ///
    /// Returns an empty set when none does; every name then resolves to the fallback group.
    pub fn scan() -> Self {
        Self::scan_paths(CONFIG_SEARCH_PATHS.iter().map(PathBuf::from))
    }

    pub fn scan_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        for path in paths {
            if !path.is_file() {
                continue;
            }
            match Self::load(&path) {
                Ok(set) => {
                    debug!(path = %path.display(), names = set.len(), "Loaded database configuration");
                    return set;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping database configuration"),
            }
        }
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, mut config: DbConfig) {
        config.normalize();
        self.configs.insert(name.into(), config);
    }

    pub fn get(&self, name: &str) -> Option<&DbConfig> {
        self.configs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Command line options for the `db-access` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-access",
    about = "Run a statement against a named database connection group",
    version,
    author
)]
pub struct Config {
    /// YAML file mapping connection names to records.
    /// When omitted, config/db.yaml and ../config/db.yaml are probed.
    #[arg(short, long, value_name = "FILE", env = "DB_ACCESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logical connection name
    #[arg(short, long, default_value = DEFAULT_CONNECTION_NAME, env = "DB_ACCESS_NAME")]
    pub name: String,

    /// Route the statement to a slave session instead of the master
    #[arg(long, conflicts_with = "execute")]
    pub slave: bool,

    /// Run the statement as a write inside a transaction and print rows affected
    #[arg(short, long)]
    pub execute: bool,

    /// Statement timeout in seconds
    #[arg(long, default_value_t = 30, env = "DB_ACCESS_TIMEOUT")]
    pub timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_ACCESS_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_ACCESS_JSON_LOGS")]
    pub json_logs: bool,

    /// SQL statement to run
    pub sql: String,
}

impl Config {
    /// Load the connection records named by `--config`, or probe the default paths.
    pub fn load_config_set(&self) -> DbResult<ConfigSet> {
        match &self.config {
            Some(path) => ConfigSet::load(path),
            None => Ok(ConfigSet::scan()),
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
