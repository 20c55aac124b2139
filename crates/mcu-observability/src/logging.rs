//! Structured logging
//!
//! Builds an `EnvFilter` from the configured level and per-module overrides
//! and installs a text or JSON formatter behind a reload layer, so the level
//! can be changed at runtime.

use mcu_config::{LogLevel, LoggingConfig};
use parking_lot::Mutex;
use tracing_subscriber::{
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::{ObservabilityError, Result};

type ReloadHandle = Handle<EnvFilter, Registry>;

/// Owner of the installed subscriber
#[derive(Debug)]
pub struct LogManager {
    config: LoggingConfig,
    reload_handle: Mutex<ReloadHandle>,
}

impl LogManager {
    /// Install the global subscriber.
    ///
    /// Fails if a subscriber is already installed in this process.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let filter = build_filter(config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);
        let registry = tracing_subscriber::registry().with(filter);

        let installed = if config.json_format {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true);
            registry.with(layer).try_init()
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true);
            registry.with(layer).try_init()
        };
        installed.map_err(|e| ObservabilityError::logging(e.to_string()))?;

        tracing::info!(
            target: "mcu_observability",
            "Logging initialized at level {}",
            config.level
        );

        Ok(Self {
            config: config.clone(),
            reload_handle: Mutex::new(reload_handle),
        })
    }

    /// Replace the base level, keeping the module overrides
    pub fn update_level(&mut self, level: LogLevel) -> Result<()> {
        let mut config = self.config.clone();
        config.level = level;
        let filter = build_filter(&config)?;

        self.reload_handle
            .lock()
            .modify(|current| *current = filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;
        self.config = config;

        tracing::info!(target: "mcu_observability", "Log level updated to {}", level);
        Ok(())
    }

    /// Active logging configuration
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

/// Filter for the configured level plus `module=level` directives
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(config.level.as_str())
        .map_err(|e| ObservabilityError::config(format!("Invalid log level: {}", e)))?;

    let mut modules: Vec<_> = config.module_levels.iter().collect();
    modules.sort_by(|a, b| a.0.cmp(b.0));
    for (module, level) in modules {
        let directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| ObservabilityError::config(format!("Invalid directive for {}: {}", module, e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_includes_module_levels() {
        let mut config = LoggingConfig::default();
        config.level = LogLevel::Warn;
        config
            .module_levels
            .insert("mcu_gateway".to_string(), LogLevel::Debug);

        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("warn"));
        assert!(filter.contains("mcu_gateway=debug"));
    }

    #[test]
    fn test_init_then_update_level() {
        let config = LoggingConfig::default();
        let mut manager = LogManager::init(&config).unwrap();
        assert_eq!(manager.config().level, LogLevel::Info);

        manager.update_level(LogLevel::Debug).unwrap();
        assert_eq!(manager.config().level, LogLevel::Debug);

        assert!(LogManager::init(&config).is_err());
    }
}
