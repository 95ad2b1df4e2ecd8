//! Application configuration from file and environment variables
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables (prefixed with VOTESITE_)
//! 2. Config file (config.toml)
//! 3. Default values
//!
//! The session signing key is read from `SECRET_KEY` by the binary and never
//! lives in the config file.

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;

/// Global application configuration
pub static APP_CONFIG: Lazy<RwLock<AppConfig>> = Lazy::new(|| {
    RwLock::new(AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config file, using defaults: {}", e);
        AppConfig::default()
    }))
});

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5005,
        }
    }
}

/// Site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    /// Public base URL printed into token login links.
    /// Empty means "derive from the listener address".
    pub public_host: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "VoteSite".to_string(),
            public_host: String::new(),
        }
    }
}

/// Admin gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Shared key accepted by `/admin_login?k=` (env VOTESITE_ADMIN__GATE_KEY)
    pub gate_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            gate_key: "wzkjgz".to_string(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://instance/votes.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Background vote writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Retries after the first failed attempt before a job is dropped
    pub max_retries: u32,
    /// Linear backoff step; retry `n` sleeps `n * backoff_step_ms`
    pub backoff_step_ms: u64,
    /// Queue depth at which a warning is logged
    pub queue_warn_depth: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step_ms: 500,
            queue_warn_depth: 1000,
        }
    }
}

impl WriterConfig {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub site: SiteConfig,
    pub admin: AdminConfig,
    pub database: DatabaseConfig,
    pub writer: WriterConfig,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        use config::FileFormat;

        let config = Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(File::new(path, FileFormat::Toml).required(false))
            // e.g. VOTESITE_SERVER__PORT, VOTESITE_WRITER__MAX_RETRIES
            .add_source(
                Environment::with_prefix("VOTESITE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Login link for a token, e.g. `http://host:5005/login/abc`
    pub fn login_url(&self, token: &str) -> String {
        let base = if self.site.public_host.is_empty() {
            format!("http://localhost:{}/", self.server.port)
        } else if self.site.public_host.ends_with('/') {
            self.site.public_host.clone()
        } else {
            format!("{}/", self.site.public_host)
        };
        format!("{}login/{}", base, token)
    }
}

/// Initialize application configuration
///
/// Triggers the lazy load and logs the result.
pub fn init() {
    let config = get_config();
    log::info!(
        "Configuration loaded: site.name = {}, database.url = {}",
        config.site.name,
        config.database.url
    );
}

/// Get the current application configuration
pub fn get_config() -> AppConfig {
    APP_CONFIG.read().map(|c| c.clone()).unwrap_or_default()
}

/// Get admin configuration
pub fn admin() -> AdminConfig {
    get_config().admin
}
