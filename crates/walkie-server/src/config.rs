//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Auth token policy.
    #[serde(default)]
    pub auth: AuthConfig,

    /// WebSocket settings.
    #[serde(default)]
    pub ws: WsConfig,

    /// Intent classifier upstream.
    #[serde(default)]
    pub ai: AiConfig,

    /// Speech-to-text upstream.
    #[serde(default)]
    pub stt: SttConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_url")]
    pub url: String,

    /// Busy timeout for locked databases, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "walkie_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Auth token policy.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Seconds of inactivity after which a token expires.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

/// WebSocket settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsConfig {
    /// Origins allowed to connect. Same-host origins are always allowed.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Intent classifier upstream settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiConfig {
    /// Base URL of the chat-completion endpoint.
    #[serde(default)]
    pub base_url: String,

    /// Model name.
    #[serde(default)]
    pub model: String,

    /// Bearer credential. Empty disables the Authorization header.
    #[serde(default)]
    pub api_key: String,
}

/// Speech-to-text upstream settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SttConfig {
    /// Full URL WAV payloads are POSTed to. Empty disables STT.
    #[serde(default)]
    pub endpoint: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    8080
}

fn default_db_url() -> String {
    "walkie.db".to_string()
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `DATABASE_URL` overrides `database.url`
/// - `PORT` overrides `server.port`
/// - `ALLOWED_WS_ORIGINS` (comma-separated) overrides `ws.allowed_origins`
/// - `AUTH_TOKEN_TTL` (seconds) overrides `auth.token_ttl_secs`
/// - `AI_API_URL` overrides `ai.base_url`
/// - `AI_MODEL` overrides `ai.model`
/// - `DO_AI_ACCESS_KEY` overrides `ai.api_key`
/// - `STT_API_URL` overrides `stt.endpoint`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            config.database.url = url;
        }
    }
    if let Ok(port) = std::env::var("PORT") {
        if let Ok(parsed) = port.trim().parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(origins) = std::env::var("ALLOWED_WS_ORIGINS") {
        config.ws.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(ttl) = std::env::var("AUTH_TOKEN_TTL") {
        if let Ok(parsed) = ttl.trim().parse() {
            config.auth.token_ttl_secs = parsed;
        }
    }
    if let Ok(url) = std::env::var("AI_API_URL") {
        config.ai.base_url = url;
    }
    if let Ok(model) = std::env::var("AI_MODEL") {
        config.ai.model = model;
    }
    if let Ok(key) = std::env::var("DO_AI_ACCESS_KEY") {
        config.ai.api_key = key;
    }
    if let Ok(url) = std::env::var("STT_API_URL") {
        config.stt.endpoint = url;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.token_ttl_secs, 86_400);
        assert!(config.ws.allowed_origins.is_empty());
        assert!(config.stt.endpoint.is_empty());
    }

    #[test]
    fn toml_overrides_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [auth]
            token_ttl_secs = 3600

            [ws]
            allowed_origins = ["https://app.example"]
            "#,
        )
        .expect("parse config");
        assert_eq!(parsed.server.port, 9000);
        assert_eq!(parsed.auth.token_ttl_secs, 3600);
        assert_eq!(parsed.ws.allowed_origins, vec!["https://app.example"]);
        assert_eq!(parsed.database.pool_max_size, 8);
    }
}
