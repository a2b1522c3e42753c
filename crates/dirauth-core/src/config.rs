//! Configuration for Dirauth

use crate::types::{Schema, SchemaMapping, SearchBase};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirauthConfig {
    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DirauthConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Configuration(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from DIRAUTH_* environment variables
    pub fn apply_env(&mut self) {
        if let Ok(servers) = std::env::var("DIRAUTH_SERVERS") {
            self.directory.servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(port) = std::env::var("DIRAUTH_PORT") {
            if let Ok(p) = port.parse() {
                self.directory.port = p;
            }
        }
        if let Ok(dn) = std::env::var("DIRAUTH_BIND_DN") {
            self.directory.bind_dn = dn;
        }
        if let Ok(password) = std::env::var("DIRAUTH_BIND_PASSWORD") {
            self.directory.bind_password = password;
        }
        if let Ok(bases) = std::env::var("DIRAUTH_SEARCH_BASES") {
            self.directory.search_bases = bases
                .split(';')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(SearchBase::subtree)
                .collect();
        }
        if std::env::var("DIRAUTH_USE_SSL").map(|v| v == "true").unwrap_or(false) {
            self.directory.use_ssl = true;
        }
        if let Ok(level) = std::env::var("DIRAUTH_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.directory.validate()?;
        self.cache.validate()
    }
}

/// Server selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Stick with the current server until it fails
    #[default]
    Failover,
    /// Rotate through servers on every connect
    RoundRobin,
}

/// Directory connection and schema configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DirectoryConfig {
    /// Server host names, in preference order
    #[serde(default)]
    pub servers: Vec<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect with ldaps://
    #[serde(default)]
    pub use_ssl: bool,

    /// Upgrade plain connections with STARTTLS
    #[serde(default)]
    pub start_tls: bool,

    /// Skip TLS certificate verification (not recommended for production)
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Service account used by the search service
    #[serde(default)]
    pub bind_dn: String,

    #[serde(default)]
    pub bind_password: String,

    /// Search bases, visited in order
    #[serde(default)]
    pub search_bases: Vec<SearchBase>,

    #[serde(default)]
    pub schema: Schema,

    /// Overrides the built-in mapping of `schema`
    #[serde(default)]
    pub mapping: Option<SchemaMapping>,

    /// Bind name template for user logins, use {username} as placeholder
    #[serde(default)]
    pub user_bind_template: Option<String>,

    #[serde(default = "default_page_size")]
    pub page_size: i32,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,

    #[serde(default = "default_blacklist_duration")]
    pub blacklist_duration_seconds: u64,

    #[serde(default)]
    pub selection_policy: SelectionPolicy,

    /// Expand nested group memberships
    #[serde(default)]
    pub recursive_groups: bool,

    /// Claim type emitted for the primary group
    #[serde(default)]
    pub primary_group_claim: Option<String>,
}

fn default_port() -> u16 {
    crate::DEFAULT_LDAP_PORT
}

fn default_page_size() -> i32 {
    crate::DEFAULT_PAGE_SIZE
}

fn default_timeout() -> u64 {
    10
}

fn default_polling_interval() -> u64 {
    100
}

fn default_blacklist_duration() -> u64 {
    300 // 5 minutes
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            port: default_port(),
            use_ssl: false,
            start_tls: false,
            skip_tls_verify: false,
            bind_dn: String::new(),
            bind_password: String::new(),
            search_bases: Vec::new(),
            schema: Schema::default(),
            mapping: None,
            user_bind_template: None,
            page_size: default_page_size(),
            timeout_seconds: default_timeout(),
            polling_interval_ms: default_polling_interval(),
            blacklist_duration_seconds: default_blacklist_duration(),
            selection_policy: SelectionPolicy::default(),
            recursive_groups: false,
            primary_group_claim: None,
        }
    }
}

impl DirectoryConfig {
    /// Mapping in effect: the explicit override, else the schema defaults
    pub fn effective_mapping(&self) -> crate::Result<SchemaMapping> {
        match &self.mapping {
            Some(mapping) => Ok(mapping.clone()),
            None => SchemaMapping::defaults_for(&self.schema).ok_or_else(|| {
                crate::Error::Configuration(format!(
                    "Schema {} has no built-in mapping; configure directory.mapping",
                    self.schema
                ))
            }),
        }
    }

    /// Name passed to the directory when binding as a user
    pub fn user_bind_name(&self, username: &str) -> String {
        match &self.user_bind_template {
            Some(template) => template.replace("{username}", username),
            None => username.to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(1))
    }

    pub fn blacklist_duration(&self) -> Duration {
        Duration::from_secs(self.blacklist_duration_seconds)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.servers.is_empty() {
            return Err(crate::Error::Configuration(
                "At least one directory server is required".to_string(),
            ));
        }

        if self.search_bases.is_empty() {
            return Err(crate::Error::Configuration(
                "At least one search base is required".to_string(),
            ));
        }

        if self.page_size <= 0 {
            return Err(crate::Error::Configuration(
                "Page size must be positive".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(crate::Error::Configuration(
                "Timeout must be positive".to_string(),
            ));
        }

        if self.blacklist_duration_seconds == 0 {
            return Err(crate::Error::Configuration(
                "Blacklist duration must be positive".to_string(),
            ));
        }

        if self.use_ssl && self.start_tls {
            return Err(crate::Error::Configuration(
                "use_ssl and start_tls are mutually exclusive".to_string(),
            ));
        }

        let mapping = self.effective_mapping()?;
        if !mapping.user_filter.contains("{username}") {
            return Err(crate::Error::Configuration(
                "User filter must contain {username} placeholder".to_string(),
            ));
        }

        if let Some(template) = &self.user_bind_template {
            if !template.contains("{username}") {
                return Err(crate::Error::Configuration(
                    "User bind template must contain {username} placeholder".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Entry cache expiration policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Cache disabled
    None,
    /// Entries expire a fixed time after insertion
    #[default]
    FixedExpiration,
    /// Every read pushes expiry out again
    SlidingExpiration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default)]
    pub policy: CachePolicy,

    #[serde(default = "default_cache_duration")]
    pub duration_seconds: u64,

    #[serde(default = "default_cache_capacity")]
    pub max_entries: usize,
}

fn default_cache_duration() -> u64 {
    300 // 5 minutes
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            duration_seconds: default_cache_duration(),
            max_entries: default_cache_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.policy != CachePolicy::None {
            if self.duration_seconds == 0 {
                return Err(crate::Error::Configuration(
                    "Cache duration must be positive when caching is enabled".to_string(),
                ));
            }
            if self.max_entries == 0 {
                return Err(crate::Error::Configuration(
                    "Cache capacity must be positive when caching is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
