use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcu_config::{Config, ConfigManager};
use mcu_engine::{ExecutionController, LibraryEngine, OutputCapture, OutputChannel};
use mcu_gateway::{EngineHandle, Gateway, GatewayConfig};
use mcu_observability::LogManager;
use tracing::{error, info};

mod assets;

#[derive(Parser, Debug, Clone)]
#[command(name = "mcu-server")]
#[command(about = "WebSocket gateway for the ATmega328p emulator")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "MCU_CONFIG")]
    config: Option<String>,

    /// Gateway bind address (overrides config)
    #[arg(long, env = "MCU_BIND")]
    bind: Option<String>,

    /// Asset server bind address (overrides config)
    #[arg(long, env = "MCU_ASSETS_BIND")]
    assets_bind: Option<String>,

    /// Directory served by the asset server (overrides config)
    #[arg(long, env = "MCU_ASSETS_ROOT")]
    assets_root: Option<String>,

    /// Do not start the asset server
    #[arg(long, env = "MCU_NO_ASSETS", default_value = "false")]
    no_assets: bool,

    /// Path of the emulator shared library (overrides config)
    #[arg(long, env = "MCU_ENGINE_LIB")]
    engine_lib: Option<String>,

    /// Log level (overrides config)
    #[arg(long, env = "MCU_LOG_LEVEL")]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long, env = "MCU_DEBUG", default_value = "false")]
    debug: bool,
}

impl Cli {
    /// Write command-line values over the loaded configuration
    fn apply(&self, config: &mut Config) -> Result<()> {
        let overrides = [
            ("gateway.bind", self.bind.as_deref()),
            ("assets.bind", self.assets_bind.as_deref()),
            ("assets.root", self.assets_root.as_deref()),
            ("engine.library", self.engine_lib.as_deref()),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                config.set_value(key, value)?;
            }
        }

        if self.no_assets {
            config.assets.enabled = false;
        }

        match (&self.log_level, self.debug) {
            (Some(level), _) => config.set_value("logging.level", level)?,
            (None, true) => config.set_value("logging.level", "debug")?,
            (None, false) => {}
        }
        Ok(())
    }

    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => {
                Ok(mcu_config::expand_tilde(path).unwrap_or_else(|| PathBuf::from(path)))
            }
            None => mcu_config::default_config_path().context("Could not find home directory"),
        }
    }
}

#[cfg(unix)]
fn output_channel() -> Result<Arc<dyn OutputChannel>> {
    Ok(Arc::new(mcu_engine::StdoutChannel::new()))
}

#[cfg(not(unix))]
fn output_channel() -> Result<Arc<dyn OutputChannel>> {
    anyhow::bail!("capturing engine output requires a unix platform")
}

fn gateway_config(config: &Config) -> GatewayConfig {
    GatewayConfig {
        bind: config.gateway.bind.clone(),
        greeting: config.gateway.greeting.clone(),
        report_unknown_events: config.gateway.report_unknown_events,
        slow_call_warn: Duration::from_millis(config.gateway.slow_call_warn_ms),
        handshake_timeout: Duration::from_millis(config.gateway.handshake_timeout_ms),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config_path()?;
    let mut manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    cli.apply(manager.config_mut())?;
    let created = manager.created();
    let config = manager.into_config();
    ConfigManager::validate(&config).context("Invalid configuration")?;

    let _log_manager = LogManager::init(&config.logging)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Config loaded from {:?}", config_path);
    }

    let library = mcu_config::expand_tilde(&config.engine.library)
        .unwrap_or_else(|| PathBuf::from(&config.engine.library));
    let engine = LibraryEngine::open(&library)
        .with_context(|| format!("Failed to load engine library {:?}", library))?;

    let controller = ExecutionController::new(engine, OutputCapture::new(output_channel()?));
    let gateway_config = gateway_config(&config);
    let engine = EngineHandle::new(controller, gateway_config.slow_call_warn);
    let gateway = Gateway::new(gateway_config, engine);

    if config.assets.enabled {
        let addr: SocketAddr = config.assets.bind.parse()?;
        let root = PathBuf::from(&config.assets.root);
        tokio::spawn(async move {
            if let Err(e) = assets::serve(addr, root).await {
                error!("Asset server failed: {}", e);
            }
        });
    }

    info!("Starting {}", gateway);
    tokio::select! {
        result = gateway.run() => result.context("Gateway stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
