//! Configuration management for linkgate
//!
//! Configuration comes either from `LINKGATE_*` environment variables or
//! from a TOML file. Missing keys fall back to the defaults below.
//!
//! ```toml
//! data_dir = "/var/lib/linkgate"
//! always_show_something = true
//!
//! [coordinator]
//! url = "https://coordinator.example/router"
//!
//! [identity]
//! trusted = ["google", "bing"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::ClientConfig;
use crate::handler::HandlerSettings;
use crate::models::{BotIdentity, Site, TrustPolicy};
use crate::storage::StoreSettings;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for per-site state files
    pub data_dir: PathBuf,

    /// Fixed site instead of the request's Host header
    pub site: Option<String>,

    /// Treat every request as a bot without persisting or reporting
    pub emulation: bool,

    /// Re-serve used links once the queue is exhausted
    pub always_show_something: bool,

    /// Deadline for a whole request in seconds
    pub request_timeout_secs: u64,

    /// Coordinator configuration
    pub coordinator: CoordinatorSettings,

    /// Cache lifetimes
    pub cache: CacheSettings,

    /// Crawler verification
    pub identity: IdentitySettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Coordinator connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Endpoint URL
    pub url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Extra attempts after a transport failure
    pub retry_count: u32,
}

/// Cache lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// How long a fetched queue is reused, in seconds
    pub queue_ttl_secs: u64,

    /// How long a shown link stays used, in seconds
    pub used_retention_secs: u64,
}

/// Crawler verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Timeout of a single DNS lookup in seconds
    pub dns_timeout_secs: u64,

    /// Identities whose allocations are persisted and reported
    pub trusted: Vec<BotIdentity>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let trusted = match std::env::var("LINKGATE_TRUSTED_BOTS") {
            Ok(list) => parse_identity_list(&list).context("Invalid LINKGATE_TRUSTED_BOTS")?,
            Err(_) => defaults.identity.trusted,
        };

        Ok(Self {
            data_dir: std::env::var("LINKGATE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            site: std::env::var("LINKGATE_SITE")
                .ok()
                .filter(|site| !site.trim().is_empty()),
            emulation: env_flag("LINKGATE_EMULATION", defaults.emulation),
            always_show_something: env_flag(
                "LINKGATE_ALWAYS_SHOW",
                defaults.always_show_something,
            ),
            request_timeout_secs: env_parse(
                "LINKGATE_REQUEST_TIMEOUT",
                defaults.request_timeout_secs,
            ),
            coordinator: CoordinatorSettings {
                url: std::env::var("LINKGATE_COORDINATOR_URL")
                    .unwrap_or(defaults.coordinator.url),
                timeout_secs: env_parse(
                    "LINKGATE_COORDINATOR_TIMEOUT",
                    defaults.coordinator.timeout_secs,
                ),
                retry_count: env_parse(
                    "LINKGATE_COORDINATOR_RETRIES",
                    defaults.coordinator.retry_count,
                ),
            },
            cache: CacheSettings {
                queue_ttl_secs: env_parse("LINKGATE_QUEUE_TTL", defaults.cache.queue_ttl_secs),
                used_retention_secs: env_parse(
                    "LINKGATE_USED_RETENTION",
                    defaults.cache.used_retention_secs,
                ),
            },
            identity: IdentitySettings {
                dns_timeout_secs: env_parse(
                    "LINKGATE_DNS_TIMEOUT",
                    defaults.identity.dns_timeout_secs,
                ),
                trusted,
            },
            logging: LoggingConfig {
                level: std::env::var("LINKGATE_LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: std::env::var("LINKGATE_LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("data_dir must not be empty");
        }

        url::Url::parse(&self.coordinator.url)
            .with_context(|| format!("Invalid coordinator url: {}", self.coordinator.url))?;

        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("coordinator.timeout_secs", self.coordinator.timeout_secs),
            ("cache.queue_ttl_secs", self.cache.queue_ttl_secs),
            ("cache.used_retention_secs", self.cache.used_retention_secs),
            ("identity.dns_timeout_secs", self.identity.dns_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{name} must be greater than 0");
            }
        }

        self.site()?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be text or json, got {}", self.logging.format);
        }

        Ok(())
    }

    /// Normalized site override, if configured
    pub fn site(&self) -> Result<Option<Site>> {
        self.site
            .as_deref()
            .map(|raw| Site::parse(raw).with_context(|| format!("Invalid site: {raw:?}")))
            .transpose()
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.identity.dns_timeout_secs)
    }

    #[must_use]
    pub fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy::new(self.identity.trusted.iter().copied())
    }

    #[must_use]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            queue_ttl: Duration::from_secs(self.cache.queue_ttl_secs),
            used_retention: Duration::from_secs(self.cache.used_retention_secs),
        }
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.coordinator.url.clone())
            .with_timeout(Duration::from_secs(self.coordinator.timeout_secs))
            .with_retry_count(self.coordinator.retry_count)
    }

    /// Handler switches derived from this configuration
    pub fn handler_settings(&self) -> Result<HandlerSettings> {
        Ok(HandlerSettings::default()
            .with_emulation(self.emulation)
            .with_trust(self.trust_policy())
            .with_site_override(self.site()?)
            .with_request_timeout(self.request_timeout()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/tmp/linkgate"),
            site: None,
            emulation: false,
            always_show_something: false,
            request_timeout_secs: 15,
            coordinator: CoordinatorSettings::default(),
            cache: CacheSettings::default(),
            identity: IdentitySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:8080/router"),
            timeout_secs: 10,
            retry_count: 0,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            queue_ttl_secs: 600,
            used_retention_secs: 86_400,
        }
    }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            dns_timeout_secs: 3,
            trusted: BotIdentity::VERIFIED.to_vec(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Parse a comma separated list of identities, e.g. `google,bing`
pub fn parse_identity_list(list: &str) -> Result<Vec<BotIdentity>> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| name.parse::<BotIdentity>().map_err(anyhow::Error::msg))
        .collect()
}
