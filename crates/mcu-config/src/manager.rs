use crate::config::{Config, ConfigError, ConfigResult};
use regex::Regex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Loads, validates and persists the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Config,
    created: bool,
}

impl ConfigManager {
    /// Load the configuration at `path`, writing the defaults there first
    /// when the file does not exist.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let created = !path.exists();
        let config = if !created {
            debug!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            serde_json::from_str(&content)?
        } else {
            debug!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            default_config
        };

        Ok(Self {
            path: path.to_path_buf(),
            config,
            created,
        })
    }

    /// Load from `~/.mcu-gateway/config.json`
    pub async fn load_default() -> ConfigResult<Self> {
        let path = crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))?;
        Self::load(&path).await
    }

    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config,
            created: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `load` wrote the defaults because no file existed.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Write the current configuration back to its file
    pub async fn save(&self) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(&self.config)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    /// Check the values the server cannot start without
    pub fn validate(config: &Config) -> ConfigResult<()> {
        let gateway_bind = parse_bind("gateway.bind", &config.gateway.bind)?;

        if config.assets.enabled {
            let assets_bind = parse_bind("assets.bind", &config.assets.bind)?;
            if assets_bind == gateway_bind {
                return Err(ConfigError::Validation(format!(
                    "gateway.bind and assets.bind are both {}",
                    gateway_bind
                )));
            }
        }

        if config.engine.library.trim().is_empty() {
            return Err(ConfigError::Validation(
                "engine.library cannot be empty".to_string(),
            ));
        }

        if config.gateway.slow_call_warn_ms == 0 {
            return Err(ConfigError::Validation(
                "gateway.slow_call_warn_ms must be greater than 0".to_string(),
            ));
        }

        if config.gateway.handshake_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "gateway.handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }

        debug!("Config validated");
        Ok(())
    }

    /// Expand `${VAR}` and `${VAR:-default}` from the environment
    pub fn expand_env_vars(content: &str) -> ConfigResult<String> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex")
        });

        let mut missing = None;
        let result = re.replace_all(content, |caps: &regex::Captures<'_>| {
            let expr = &caps[1];
            let (name, default) = match expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (expr, None),
            };
            match (std::env::var(name), default) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(ConfigError::EnvVarNotFound(name)),
            None => Ok(result.into_owned()),
        }
    }
}

fn parse_bind(key: &str, value: &str) -> ConfigResult<SocketAddr> {
    value.parse().map_err(|_| {
        ConfigError::Validation(format!("{} is not a socket address: {:?}", key, value))
    })
}
