//! The central HomeAssistant instance
//!
//! Integrations receive an `Arc<HomeAssistant>` and reach the event bus,
//! state machine, service registry and restore-state store through it.

use ha_core::events::{HOMEASSISTANT_START, HOMEASSISTANT_STOP};
use ha_core::{Context, Event};
use ha_event_bus::EventBus;
use ha_restore_state::RestoreStateStore;
use ha_service_registry::ServiceRegistry;
use ha_state_machine::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Lifecycle of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    NotRunning,
    Starting,
    Running,
    Stopping,
}

/// Temperature unit of the configured unit system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "°F")]
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    /// Parse a `unit_of_measurement` value; anything unrecognised is `None`
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "°C" | "C" => Some(TemperatureUnit::Celsius),
            "°F" | "F" => Some(TemperatureUnit::Fahrenheit),
            _ => None,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `unit_system` core option
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    #[default]
    Metric,
    #[serde(alias = "us_customary")]
    Imperial,
}

impl UnitSystem {
    pub fn temperature_unit(&self) -> TemperatureUnit {
        match self {
            UnitSystem::Metric => TemperatureUnit::Celsius,
            UnitSystem::Imperial => TemperatureUnit::Fahrenheit,
        }
    }
}

/// Core configuration (`homeassistant:` section)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub unit_system: UnitSystem,
    /// Directory holding configuration.yaml and .storage/
    #[serde(skip)]
    pub config_dir: Option<PathBuf>,
}

/// The central HomeAssistant instance
pub struct HomeAssistant {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// State machine for entity states
    pub states: Arc<StateMachine>,
    /// Service registry for service calls
    pub services: Arc<ServiceRegistry>,
    /// Last-known states from the previous run
    pub restore: Arc<RestoreStateStore>,
    pub config: CoreConfig,
    core_state: watch::Sender<CoreState>,
}

impl HomeAssistant {
    /// An in-memory instance with default configuration
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default(), RestoreStateStore::in_memory())
    }

    pub fn with_config(config: CoreConfig, restore: RestoreStateStore) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::new());
        let (core_state, _) = watch::channel(CoreState::NotRunning);

        Self {
            bus,
            states,
            services,
            restore: Arc::new(restore),
            config,
            core_state,
        }
    }

    pub fn core_state(&self) -> CoreState {
        *self.core_state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.core_state() == CoreState::Running
    }

    pub fn set_starting(&self) {
        self.core_state.send_replace(CoreState::Starting);
    }

    /// Mark the host running and fire `homeassistant_start`
    pub fn start(&self) {
        self.core_state.send_replace(CoreState::Running);
        self.bus
            .fire(Event::new(HOMEASSISTANT_START, serde_json::json!({}), Context::new()));
        info!("Home Assistant is running");
    }

    /// Fire `homeassistant_stop` and persist restore state
    pub async fn stop(&self) {
        self.core_state.send_replace(CoreState::Stopping);
        self.bus
            .fire(Event::new(HOMEASSISTANT_STOP, serde_json::json!({}), Context::new()));

        match self.restore.dump(&self.states).await {
            Ok(count) => info!(count, "Saved restore state"),
            Err(e) => warn!(error = %e, "Failed to save restore state"),
        }
        self.core_state.send_replace(CoreState::NotRunning);
    }

    /// Temperature unit of the configured unit system
    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.config.unit_system.temperature_unit()
    }
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self::new()
    }
}
