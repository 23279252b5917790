//! Configuration management for the gateway
//!
//! Settings are loaded from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use crate::kubernetes::manifest::ImportLimits;
use crate::kubernetes::{ClusterConfig, WatchSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub auth: AuthSettings,
    pub requests: RequestSettings,
    pub resources: ResourceSettings,
    pub import: ImportSettings,
    pub watch: WatchConfig,
    pub audit: AuditSettings,
    /// Clusters registered at startup
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// JSON console output
    pub json_format: bool,
    pub file_logging_enabled: bool,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret used to validate bearer tokens
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

/// Per-request deadline bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Objects per page on `/api/resources`
    pub list_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub max_bytes: usize,
    pub max_documents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Frames buffered per subscriber before the oldest is dropped
    pub subscriber_buffer: usize,
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Page size for the baseline list behind each watch
    pub list_page_size: u32,
    /// Server-side timeout requested on upstream watch calls
    pub upstream_timeout_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    /// JSON-lines file; records stay in memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("/var/log/kubegate"),
            json_format: false,
            file_logging_enabled: false,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
        }
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_timeout_secs: 300,
        }
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self { list_page_size: 100 }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024,
            max_documents: 64,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            max_reconnect_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            list_page_size: 500,
            upstream_timeout_secs: 290,
        }
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: Some(PathBuf::from("/var/log/kubegate/audit.log")),
        }
    }
}

impl WatchConfig {
    pub fn settings(&self) -> WatchSettings {
        WatchSettings {
            subscriber_buffer: self.subscriber_buffer,
            max_reconnect_attempts: self.max_reconnect_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            list_page_size: self.list_page_size,
        }
    }
}

impl ImportSettings {
    pub fn limits(&self) -> ImportLimits {
        ImportLimits {
            max_bytes: self.max_bytes,
            max_documents: self.max_documents,
        }
    }
}

impl RequestSettings {
    /// Deadline for a request, honoring a caller-supplied value up to the cap
    pub fn deadline(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .filter(|s| *s > 0)
            .unwrap_or(self.default_timeout_secs)
            .min(self.max_timeout_secs);
        Duration::from_secs(secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl GatewayConfig {
    /// Load configuration from the first config file found plus environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("KUBEGATE_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/kubegate/config.toml")),
            Some(PathBuf::from("./config.toml")),
            Some(PathBuf::from("./kubegate.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(host) = std::env::var("KUBEGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("KUBEGATE_PORT") {
            self.server.port = port;
        }

        // Logging
        if let Ok(level) = std::env::var("KUBEGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(path) = std::env::var("KUBEGATE_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(path);
        }
        if let Some(json) = env_parse("KUBEGATE_LOG_JSON") {
            self.logging.json_format = json;
        }
        if let Some(enabled) = env_parse("KUBEGATE_FILE_LOGGING") {
            self.logging.file_logging_enabled = enabled;
        }

        // Auth
        if let Ok(secret) = std::env::var("KUBEGATE_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        // Requests
        if let Some(secs) = env_parse("KUBEGATE_REQUEST_TIMEOUT_SECS") {
            self.requests.default_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("KUBEGATE_MAX_REQUEST_TIMEOUT_SECS") {
            self.requests.max_timeout_secs = secs;
        }

        // Resources
        if let Some(size) = env_parse("KUBEGATE_LIST_PAGE_SIZE") {
            self.resources.list_page_size = size;
        }

        // Import
        if let Some(bytes) = env_parse("KUBEGATE_IMPORT_MAX_BYTES") {
            self.import.max_bytes = bytes;
        }
        if let Some(docs) = env_parse("KUBEGATE_IMPORT_MAX_DOCUMENTS") {
            self.import.max_documents = docs;
        }

        // Watch
        if let Some(buffer) = env_parse("KUBEGATE_WATCH_BUFFER") {
            self.watch.subscriber_buffer = buffer;
        }
        if let Some(attempts) = env_parse("KUBEGATE_WATCH_MAX_RECONNECTS") {
            self.watch.max_reconnect_attempts = attempts;
        }

        // Audit
        if let Some(enabled) = env_parse("KUBEGATE_AUDIT_ENABLED") {
            self.audit.enabled = enabled;
        }
        if let Ok(path) = std::env::var("KUBEGATE_AUDIT_LOG") {
            self.audit.log_file = Some(PathBuf::from(path));
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Validation("JWT secret cannot be empty".to_string()));
        }
        if self.watch.subscriber_buffer == 0 {
            return Err(ConfigError::Validation(
                "Watch subscriber buffer must be at least 1".to_string(),
            ));
        }
        if self.requests.default_timeout_secs == 0 || self.requests.max_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Request timeouts must be positive".to_string(),
            ));
        }
        if self.requests.default_timeout_secs > self.requests.max_timeout_secs {
            return Err(ConfigError::Validation(format!(
                "Default request timeout ({}s) exceeds the maximum ({}s)",
                self.requests.default_timeout_secs, self.requests.max_timeout_secs
            )));
        }
        if self.resources.list_page_size == 0 || self.watch.list_page_size == 0 {
            return Err(ConfigError::Validation(
                "List page sizes must be positive".to_string(),
            ));
        }
        if self.import.max_bytes == 0 || self.import.max_documents == 0 {
            return Err(ConfigError::Validation(
                "Import limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.requests.default_timeout_secs, 30);
        assert_eq!(config.import.max_bytes, 512 * 1024);
        assert!(config.clusters.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.auth.jwt_secret.clear();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.requests.default_timeout_secs = 600;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = GatewayConfig::default();
        config.watch.subscriber_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.resources.list_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadline_is_capped() {
        let requests = RequestSettings::default();
        assert_eq!(requests.deadline(None), Duration::from_secs(30));
        assert_eq!(requests.deadline(Some(5)), Duration::from_secs(5));
        assert_eq!(requests.deadline(Some(0)), Duration::from_secs(30));
        assert_eq!(requests.deadline(Some(10_000)), Duration::from_secs(300));
    }

    #[test]
    fn test_generate_sample_config() {
        let sample = GatewayConfig::generate_sample();
        for section in ["[server]", "[logging]", "[auth]", "[requests]", "[resources]", "[import]", "[watch]", "[audit]"] {
            assert!(sample.contains(section), "missing {}", section);
        }
    }

    #[test]
    fn test_load_partial_file_with_clusters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 9090

[watch]
subscriber_buffer = 32

[[clusters]]
name = "prod"
endpoint = "https://10.0.0.1:6443"
credential = {{ type = "token", token = "abc" }}
"#
        )
        .unwrap();

        let config = GatewayConfig::load_from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.watch.subscriber_buffer, 32);
        assert_eq!(config.watch.max_reconnect_attempts, 5);
        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].name, "prod");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            GatewayConfig::load_from_file(&file.path().to_path_buf()),
            Err(ConfigError::Parse(_))
        ));
    }
}
