use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub assets: AssetsConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Look up a value by dotted key, e.g. `gateway.bind`.
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["gateway", "bind"] => Some(self.gateway.bind.clone()),
            ["gateway", "greeting"] => Some(self.gateway.greeting.clone()),
            ["gateway", "report_unknown_events"] => {
                Some(self.gateway.report_unknown_events.to_string())
            }
            ["gateway", "slow_call_warn_ms"] => Some(self.gateway.slow_call_warn_ms.to_string()),
            ["gateway", "handshake_timeout_ms"] => {
                Some(self.gateway.handshake_timeout_ms.to_string())
            }
            ["assets", "enabled"] => Some(self.assets.enabled.to_string()),
            ["assets", "bind"] => Some(self.assets.bind.clone()),
            ["assets", "root"] => Some(self.assets.root.clone()),
            ["engine", "library"] => Some(self.engine.library.clone()),
            ["logging", "level"] => Some(self.logging.level.to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            _ => None,
        }
    }

    /// Set a value by dotted key, parsing it into the field's type.
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["gateway", "bind"] => {
                self.gateway.bind = value.to_string();
            }
            ["gateway", "greeting"] => {
                self.gateway.greeting = value.to_string();
            }
            ["gateway", "report_unknown_events"] => {
                self.gateway.report_unknown_events = parse_bool(value)?;
            }
            ["gateway", "slow_call_warn_ms"] => {
                self.gateway.slow_call_warn_ms = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["gateway", "handshake_timeout_ms"] => {
                self.gateway.handshake_timeout_ms = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["assets", "enabled"] => {
                self.assets.enabled = parse_bool(value)?;
            }
            ["assets", "bind"] => {
                self.assets.bind = value.to_string();
            }
            ["assets", "root"] => {
                self.assets.root = value.to_string();
            }
            ["engine", "library"] => {
                self.engine.library = value.to_string();
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = parse_bool(value)?;
            }
            ["logging", "module_levels", module] => {
                self.logging
                    .module_levels
                    .insert((*module).to_string(), value.parse()?);
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))
}

/// WebSocket gateway settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address (e.g., "127.0.0.1:3000")
    pub bind: String,
    /// Payload of the `ready` event
    pub greeting: String,
    /// Answer unknown events with a `log` event
    pub report_unknown_events: bool,
    /// Warn when a single engine call runs longer than this
    pub slow_call_warn_ms: u64,
    /// Connections that have not finished the WebSocket upgrade by then are dropped
    pub handshake_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            greeting: "Hello".to_string(),
            report_unknown_events: false,
            slow_call_warn_ms: 2000,
            handshake_timeout_ms: 10_000,
        }
    }
}

/// Static asset server for the browser client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    pub enabled: bool,
    pub bind: String,
    /// Directory served as the site root
    pub root: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:8000".to_string(),
            root: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Path of the emulator shared library
    pub library: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            library: "./libatmega328p.so".to_string(),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text
    pub json_format: bool,
    /// Per-module overrides, e.g. `{"mcu_gateway": "debug"}`
    pub module_levels: HashMap<String, LogLevel>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
