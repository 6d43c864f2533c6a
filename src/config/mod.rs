//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all optional settings
//! - Client certificate (mutual TLS) settings for the ECS API

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ECS REST API base URL
pub const DEFAULT_ECS_URL: &str = "https://api.entrust.net/enterprise/v2/";

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub requester: RequesterDefaults,
    /// Skip expired certificates during synchronization
    #[serde(default)]
    pub ignore_expired: bool,
    /// Disabled gateways skip connection validation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// ECS connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Timeout in seconds (supports both timeout_secs and timeout field names)
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
    /// Client certificate for mutual TLS (optional)
    #[serde(default)]
    pub client_certificate: Option<ClientCertificateConfig>,
}

/// Client certificate used to authenticate to ECS
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClientCertificateConfig {
    /// Path to client certificate (PEM)
    #[serde(alias = "cert_path")]
    pub cert_path: Option<PathBuf>,
    /// Path to client private key (PEM)
    #[serde(alias = "key_path")]
    pub key_path: Option<PathBuf>,
    /// Path to an additional trusted CA bundle (PEM)
    #[serde(alias = "ca_path")]
    pub ca_path: Option<PathBuf>,
}

/// Requester details used when an enrollment does not carry its own
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RequesterDefaults {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone")]
    pub phone_number: Option<String>,
}

fn default_url() -> String {
    DEFAULT_ECS_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_ssl_verify() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout(),
            ssl_verify: default_ssl_verify(),
            client_certificate: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "ecs-ca-gateway")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stderr)
    #[default]
    Console,
    /// Log to file with optional rotation
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/ecs-ca-gateway")
}

fn default_log_prefix() -> String {
    "ecs-ca-gateway".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            requester: RequesterDefaults::default(),
            ignore_expired: false,
            enabled: default_enabled(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with ECS_)
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("ECS_GATEWAY_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                Self::from_yaml(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}", path);
                GatewayConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                GatewayConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_norway::from_str(contents).context("Invalid gateway configuration")
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/ecs-ca-gateway/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("ecs-ca-gateway/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ECS_URL") {
            self.connection.url = url;
        }
        if let Ok(username) = std::env::var("ECS_USERNAME") {
            self.connection.username = username;
        }
        if let Ok(password) = std::env::var("ECS_PASSWORD") {
            self.connection.password = password;
        }

        // Client certificate overrides
        if let Ok(cert) = std::env::var("ECS_CLIENT_CERT") {
            self.connection
                .client_certificate
                .get_or_insert_with(ClientCertificateConfig::default)
                .cert_path = Some(PathBuf::from(cert));
        }
        if let Ok(key) = std::env::var("ECS_CLIENT_KEY") {
            self.connection
                .client_certificate
                .get_or_insert_with(ClientCertificateConfig::default)
                .key_path = Some(PathBuf::from(key));
        }

        if let Ok(ignore) = std::env::var("ECS_IGNORE_EXPIRED") {
            self.ignore_expired = matches!(ignore.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        // Logging overrides
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("ECS_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Validate structural settings; credentials are checked by connection validation
    pub fn validate(&self) -> Result<()> {
        let url = self.connection.url.to_lowercase();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            anyhow::bail!(
                "connection.url must be an http(s) URL, got '{}'",
                self.connection.url
            );
        }
        if self.connection.timeout_secs == 0 {
            anyhow::bail!("connection.timeout_secs must be greater than zero");
        }
        if let Some(ref cert) = self.connection.client_certificate {
            if cert.cert_path.is_some() != cert.key_path.is_some() {
                anyhow::bail!(
                    "connection.client_certificate requires both cert_path and key_path"
                );
            }
        }
        Ok(())
    }
}
