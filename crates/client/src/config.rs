use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::reconnect::ReconnectConfig;

/// Engine.IO handshake path and query used for the realtime channel.
const SOCKET_IO_PATH: &str = "socket.io/";
const SOCKET_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend running locally.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL of the backend (default: `http://localhost:5000`).
    pub base_url: Url,
    /// File holding the persisted session keys.
    pub session_file: PathBuf,
    /// Per-request HTTP timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Backoff parameters for the realtime channel.
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                                   |
    /// |---------------------------|-------------------------------------------|
    /// | `COMFYQUEUE_URL`          | `http://localhost:5000`                   |
    /// | `COMFYQUEUE_SESSION_FILE` | `<config dir>/comfyqueue/session.json`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                                      |
    /// | `RECONNECT_INITIAL_MS`    | `1000`                                    |
    /// | `RECONNECT_MAX_SECS`      | `30`                                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url =
            std::env::var("COMFYQUEUE_URL").unwrap_or_else(|_| "http://localhost:5000".into());
        let base_url = parse_base_url(&raw_url)?;

        let session_file = match std::env::var("COMFYQUEUE_SESSION_FILE") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_session_file(),
        };

        let request_timeout_secs = env_number("REQUEST_TIMEOUT_SECS", 30)?;
        let initial_ms = env_number("RECONNECT_INITIAL_MS", 1000)?;
        let max_secs = env_number("RECONNECT_MAX_SECS", 30)?;

        Ok(Self {
            base_url,
            session_file,
            request_timeout_secs,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_secs(max_secs),
                ..Default::default()
            },
        })
    }

    /// Build a configuration for `base_url` with every other field at
    /// its default.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            session_file: default_session_file(),
            request_timeout_secs: 30,
            reconnect: ReconnectConfig::default(),
        })
    }

    /// Point this configuration at another backend.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// WebSocket URL of the Socket.IO endpoint at the server root.
    pub fn realtime_url(&self) -> Url {
        let mut url = self.base_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always a permitted scheme change.
        let _ = url.set_scheme(scheme);
        url.set_path(&format!("{}{}", url.path(), SOCKET_IO_PATH));
        url.set_query(Some(SOCKET_IO_QUERY));
        url
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Parse and normalise the backend base URL so that it always ends in
/// `/` and joins cleanly with relative API paths.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: "scheme must be http or https".into(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    Ok(url)
}

fn env_number(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

fn default_session_file() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comfyqueue")
        .join("session.json")
}
