//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `PORTFOLIO_*` environment variables (`__` separates nested
//! keys, e.g. `PORTFOLIO_REMOTE__TOKEN`).

use crate::error::{PortfolioError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default remote drive API endpoint
pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Remote store connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSettings {
    pub base_url: String,

    /// Bearer credential supplied by the identity provider
    #[serde(default)]
    pub token: String,

    pub request_timeout_secs: u64,

    /// Attempts after the first for retryable failures
    pub max_retries: usize,

    pub backoff_base_ms: u64,
}

/// Scan behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct ScanSettings {
    /// Root folder holding per-unit evidence folders
    pub evidence_root: String,

    /// Concurrent remote calls per scan
    pub max_concurrency: usize,

    /// Timeout applied to each individual remote call
    pub call_timeout_secs: u64,

    /// Timeout for a whole site scan on the dashboard
    pub site_timeout_secs: u64,
}

impl ScanSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn site_timeout(&self) -> Duration {
        Duration::from_secs(self.site_timeout_secs)
    }
}

/// Cache lifetimes
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub folder_ttl_secs: u64,
    pub dashboard_ttl_secs: u64,
    pub max_entries: usize,
}

/// A candidate portfolio site
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    pub candidate: String,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub remote: RemoteSettings,
    pub scan: ScanSettings,
    pub cache: CacheSettings,
    #[serde(default)]
    pub catalogue_path: Option<PathBuf>,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::defaults()?;

        match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    debug!("Checking default configuration at {}", default_path.display());
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix("PORTFOLIO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let engine: EngineConfig = config.try_deserialize()?;
        engine.validate()?;
        Ok(engine)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("remote.base_url", DEFAULT_BASE_URL)?
            .set_default("remote.token", "")?
            .set_default("remote.request_timeout_secs", 30_i64)?
            .set_default("remote.max_retries", 3_i64)?
            .set_default("remote.backoff_base_ms", 500_i64)?
            .set_default("scan.evidence_root", "Evidence")?
            .set_default("scan.max_concurrency", 4_i64)?
            .set_default("scan.call_timeout_secs", 20_i64)?
            .set_default("scan.site_timeout_secs", 60_i64)?
            .set_default("cache.folder_ttl_secs", 900_i64)?
            .set_default("cache.dashboard_ttl_secs", 3600_i64)?
            .set_default("cache.max_entries", 1024_i64)?)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| {
            Err(PortfolioError::Config(config::ConfigError::Message(
                msg.to_string(),
            )))
        };

        if self.remote.base_url.trim().is_empty() {
            return invalid("remote.base_url cannot be empty");
        }
        if self.scan.max_concurrency == 0 {
            return invalid("scan.max_concurrency must be at least 1");
        }
        if self.scan.call_timeout_secs == 0 || self.scan.site_timeout_secs == 0 {
            return invalid("scan timeouts must be non-zero");
        }
        if self.cache.folder_ttl_secs == 0 || self.cache.dashboard_ttl_secs == 0 {
            return invalid("cache TTLs must be non-zero");
        }
        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be at least 1");
        }
        if self.scan.evidence_root.trim_matches('/').is_empty() {
            return invalid("scan.evidence_root cannot be empty");
        }
        Ok(())
    }

    /// Find a configured site
    pub fn site(&self, id: &str) -> Result<&SiteConfig> {
        self.sites
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| PortfolioError::UnknownSite(id.to_string()))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote: RemoteSettings {
                base_url: DEFAULT_BASE_URL.to_string(),
                token: String::new(),
                request_timeout_secs: 30,
                max_retries: 3,
                backoff_base_ms: 500,
            },
            scan: ScanSettings {
                evidence_root: "Evidence".to_string(),
                max_concurrency: 4,
                call_timeout_secs: 20,
                site_timeout_secs: 60,
            },
            cache: CacheSettings {
                folder_ttl_secs: 900,
                dashboard_ttl_secs: 3600,
                max_entries: 1024,
            },
            catalogue_path: None,
            sites: Vec::new(),
        }
    }
}

/// Default configuration file location (`<config dir>/portfolio/portfolio.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("portfolio").join("portfolio.toml"))
}
