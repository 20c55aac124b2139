pub mod config;
pub mod manager;

pub use config::{
    AssetsConfig, Config, ConfigError, ConfigResult, EngineConfig, GatewayConfig, LogLevel,
    LoggingConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// Directory holding the gateway's configuration (`~/.mcu-gateway`)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mcu-gateway"))
}

/// Default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.json"))
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir().map(|home| home.join(rest))
    } else {
        Some(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().to_string_lossy().contains(".mcu-gateway"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path().unwrap();
        assert!(path.ends_with(".mcu-gateway/config.json"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.mcu-gateway/libatmega328p.so");
        assert!(expanded.is_some());
        assert!(!expanded.unwrap().to_string_lossy().starts_with('~'));

        assert_eq!(
            expand_tilde("./libatmega328p.so"),
            Some(PathBuf::from("./libatmega328p.so"))
        );
    }
}
