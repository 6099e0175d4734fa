use secrecy::SecretString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::Level;

/// Default Deepgram Voice Agent endpoint.
pub const DEFAULT_VOICE_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

/// Default bound on a single relayed message, in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub frontend_port: u16,
    pub cors_origins: Vec<String>,
    pub deepgram_api_key: SecretString,
    pub upstream_url: String,
    pub session_secret: Option<SecretString>,
    pub log_level: Level,
    pub metadata_path: PathBuf,
    pub max_message_bytes: usize,
}

impl Config {
    /// Configuration with every optional setting at its default.
    pub fn new(deepgram_api_key: SecretString, upstream_url: impl Into<String>) -> Self {
        let frontend_port = 8080;
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
            frontend_port,
            cors_origins: vec![
                format!("http://localhost:{frontend_port}"),
                format!("http://127.0.0.1:{frontend_port}"),
            ],
            deepgram_api_key,
            upstream_url: upstream_url.into(),
            session_secret: None,
            log_level: Level::INFO,
            metadata_path: PathBuf::from("./deepgram.toml"),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let host = host
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue("HOST".to_string(), e.to_string()))?;
        let port = parse_var("PORT", 8081u16)?;
        let bind_address = SocketAddr::new(host, port);

        let frontend_port = parse_var("FRONTEND_PORT", 8080u16)?;
        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => vec![
                format!("http://localhost:{frontend_port}"),
                format!("http://127.0.0.1:{frontend_port}"),
            ],
        };

        let deepgram_api_key = std::env::var("DEEPGRAM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("DEEPGRAM_API_KEY".to_string()))?;

        let upstream_url = std::env::var("VOICE_AGENT_URL")
            .unwrap_or_else(|_| DEFAULT_VOICE_AGENT_URL.to_string());
        if !(upstream_url.starts_with("ws://") || upstream_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "VOICE_AGENT_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", upstream_url),
            ));
        }

        let session_secret = std::env::var("SESSION_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty())
            .map(SecretString::from);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let metadata_path = std::env::var("METADATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./deepgram.toml"));

        let max_message_bytes = parse_var("RELAY_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;
        if max_message_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_MAX_MESSAGE_BYTES".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            frontend_port,
            cors_origins,
            deepgram_api_key,
            upstream_url,
            session_secret,
            log_level,
            metadata_path,
            max_message_bytes,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
