//! Realtime Configuration
//!
//! Configuration for the subscription manager: backend schema, table names
//! per domain, websocket endpoint and log level. Every field has a default,
//! so an empty JSON object is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Severity;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Backend table backing each domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_notifications_table")]
    pub notifications: String,

    #[serde(default = "default_sessions_table")]
    pub sessions: String,

    #[serde(default = "default_reflections_table")]
    pub reflections: String,

    /// Also serves the shared (client-facing) coach notes view
    #[serde(default = "default_coach_notes_table")]
    pub coach_notes: String,
}

fn default_notifications_table() -> String {
    "notifications".to_string()
}

fn default_sessions_table() -> String {
    "sessions".to_string()
}

fn default_reflections_table() -> String {
    "reflections".to_string()
}

fn default_coach_notes_table() -> String {
    "coach_notes".to_string()
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            notifications: default_notifications_table(),
            sessions: default_sessions_table(),
            reflections: default_reflections_table(),
            coach_notes: default_coach_notes_table(),
        }
    }
}

/// WebSocket transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Endpoint (default: "ws://127.0.0.1:4000/realtime")
    #[serde(default = "default_url")]
    pub url: String,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:4000/realtime".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Database schema the change feed is scoped to (default: "public")
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Minimum log severity: trace, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub tables: TablesConfig,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            log_level: default_log_level(),
            websocket: WebSocketConfig::default(),
            tables: TablesConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON config document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Override the websocket endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.websocket.url = url.into();
        self
    }

    /// Parsed log level
    pub fn severity(&self) -> ConfigResult<Severity> {
        Severity::parse(&self.log_level)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown log_level '{}'", self.log_level)))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.schema.trim().is_empty() {
            return Err(ConfigError::Invalid("schema must not be empty".into()));
        }

        let tables = [
            ("notifications", &self.tables.notifications),
            ("sessions", &self.tables.sessions),
            ("reflections", &self.tables.reflections),
            ("coach_notes", &self.tables.coach_notes),
        ];
        for (domain, table) in tables {
            if table.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("table for {} must not be empty", domain)));
            }
        }

        let url = &self.websocket.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!("websocket url must be ws:// or wss://, got '{}'", url)));
        }

        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_secs must be positive".into()));
        }

        self.severity()?;
        Ok(())
    }
}
