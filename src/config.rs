//! Server configuration from environment variables

use std::path::PathBuf;

use crate::error::ConfigError;

/// Origins allowed when `CORS_ORIGINS` is not set
pub const DEFAULT_CORS_ORIGINS: [&str; 4] = [
    "http://localhost:4200",
    "http://127.0.0.1:4200",
    "http://localhost:4401",
    "http://127.0.0.1:4401",
];

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body
    pub body_limit_bytes: usize,
    /// Store journal; `None` keeps everything in memory
    pub data_file: Option<PathBuf>,
    /// Outbound queue size per WebSocket connection
    pub client_queue_capacity: usize,
    /// Root directory for marker attachments
    pub upload_dir: PathBuf,
    /// Maximum accepted body on marker create/update (multipart uploads)
    pub upload_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            body_limit_bytes: 10 * 1024 * 1024,
            data_file: Some(PathBuf::from("fleet_tracking.jsonl")),
            client_queue_capacity: 256,
            upload_dir: PathBuf::from("storage"),
            upload_limit_bytes: 100 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", port)?;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(limit) = lookup("BODY_LIMIT_BYTES") {
            config.body_limit_bytes = parse("BODY_LIMIT_BYTES", limit)?;
        }
        if let Some(path) = lookup("DATA_FILE") {
            let path = path.trim();
            config.data_file = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(capacity) = lookup("CLIENT_QUEUE_CAPACITY") {
            let capacity: usize = parse("CLIENT_QUEUE_CAPACITY", capacity)?;
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "CLIENT_QUEUE_CAPACITY",
                    value: "0".to_string(),
                });
            }
            config.client_queue_capacity = capacity;
        }
        if let Some(dir) = lookup("UPLOAD_DIR").filter(|d| !d.trim().is_empty()) {
            config.upload_dir = PathBuf::from(dir.trim());
        }
        if let Some(limit) = lookup("UPLOAD_LIMIT_BYTES") {
            config.upload_limit_bytes = parse("UPLOAD_LIMIT_BYTES", limit)?;
        }

        Ok(config)
    }

    /// Socket address to bind
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether any origin is allowed
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
