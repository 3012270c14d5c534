//! Home Assistant Rust Server
//!
//! Loads `configuration.yaml` from the config directory (first argument,
//! else `$HA_CONFIG_DIR`, else the working directory), sets up the climate
//! component with the dual-mode thermostats and runs until Ctrl-C.

use anyhow::{Context as _, Result};
use ha_climate::ClimateComponent;
use ha_dualmode_generic::{parse_platform_configs, DualModePlatform};
use ha_hass::{CoreConfig, HomeAssistant};
use ha_restore_state::RestoreStateStore;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "configuration.yaml";

/// The parts of `configuration.yaml` read here; `climate:` is read by the platform
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    homeassistant: Option<CoreConfig>,
}

fn config_dir() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HA_CONFIG_DIR").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn read_config(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config_dir = config_dir();
    let config_path = config_dir.join(CONFIG_FILE);
    info!(config_dir = %config_dir.display(), "Starting Home Assistant (Rust)");

    let content = read_config(&config_path).await?;
    let file: ConfigFile = serde_yaml::from_str(&content)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    let mut core_config = file.homeassistant.unwrap_or_default();
    core_config.config_dir = Some(config_dir.clone());

    let restore = RestoreStateStore::load(&config_dir).await;
    let hass = Arc::new(HomeAssistant::with_config(core_config, restore));
    hass.set_starting();

    let component = ClimateComponent::new();
    component.register_services(&hass.services);

    let platform = DualModePlatform::new(hass.clone(), component.clone(), Some(config_path));
    platform.register_reload_service();
    let configs = parse_platform_configs(&content)?;
    let added = platform.setup(configs).await?;
    info!(count = added.len(), "Home Assistant initialized");

    hass.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    hass.stop().await;

    Ok(())
}
