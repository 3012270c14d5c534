//! Platform setup, teardown and reload

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use ha_climate::{ClimateComponent, ClimateEntity};
use ha_core::{EntityId, EntityIdError, ServiceCall};
use ha_hass::HomeAssistant;
use ha_service_registry::{ServiceDescription, ServiceError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::{load_platform_configs, ConfigError, ThermostatConfig, PLATFORMS};
use crate::thermostat::DualModeThermostat;

pub const SERVICE_RELOAD: &str = "reload";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no configuration file to reload from")]
    NoConfigFile,

    #[error("cannot derive an entity id for '{name}': {source}")]
    EntityId {
        name: String,
        #[source]
        source: EntityIdError,
    },
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// The thermostats set up from one configuration
pub struct DualModePlatform {
    hass: Arc<HomeAssistant>,
    component: Arc<ClimateComponent>,
    /// `configuration.yaml` re-read on reload
    config_path: Option<PathBuf>,
    entities: Mutex<Vec<Arc<DualModeThermostat>>>,
}

impl DualModePlatform {
    pub fn new(
        hass: Arc<HomeAssistant>,
        component: Arc<ClimateComponent>,
        config_path: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            hass,
            component,
            config_path,
            entities: Mutex::new(Vec::new()),
        })
    }

    /// Create and add a thermostat per entry, returning the new entity ids
    ///
    /// Invalid entries and duplicate unique ids are logged and skipped.
    pub async fn setup(&self, configs: Vec<ThermostatConfig>) -> PlatformResult<Vec<EntityId>> {
        let mut entities = self.entities.lock().await;
        self.setup_locked(&mut entities, configs).await
    }

    async fn setup_locked(
        &self,
        entities: &mut Vec<Arc<DualModeThermostat>>,
        configs: Vec<ThermostatConfig>,
    ) -> PlatformResult<Vec<EntityId>> {
        let mut unique_ids: HashSet<String> = entities
            .iter()
            .filter_map(|e| e.unique_id().map(str::to_string))
            .collect();
        let mut added = Vec::new();

        for config in configs {
            if let Err(e) = config.validate() {
                error!(error = %e, "Skipping invalid thermostat");
                continue;
            }
            if let Some(unique_id) = &config.unique_id {
                if !unique_ids.insert(unique_id.clone()) {
                    error!(unique_id = %unique_id, name = %config.name, "Unique id already exists, skipping thermostat");
                    continue;
                }
            }

            let entity_id = self.generate_entity_id(&config)?;
            let thermostat = DualModeThermostat::new(self.hass.clone(), entity_id.clone(), config);
            thermostat.added_to_hass().await;
            self.component.add_entity(thermostat.clone());

            info!(entity_id = %entity_id, "Set up dual-mode thermostat");
            entities.push(thermostat);
            added.push(entity_id);
        }

        Ok(added)
    }

    /// `climate.<slug of name>`, suffixed `_2`, `_3`... when taken
    ///
    /// The entities the thermostat tracks count as taken even before they
    /// have a state, so a thermostat never shadows the device it wraps.
    fn generate_entity_id(&self, config: &ThermostatConfig) -> PlatformResult<EntityId> {
        let entity_id_error = |source| PlatformError::EntityId {
            name: config.name.clone(),
            source,
        };
        let base = EntityId::from_name(ha_climate::consts::DOMAIN, &config.name)
            .map_err(entity_id_error)?;
        let taken = |id: &EntityId| {
            *id == config.climate_entity_id
                || config.sensor_entity_id.as_ref() == Some(id)
                || self.component.entity(id).is_some()
                || self.hass.states.get(&id.to_string()).is_some()
        };

        if !taken(&base) {
            return Ok(base);
        }
        let mut suffix = 2;
        loop {
            let candidate = EntityId::new(base.domain(), format!("{}_{}", base.object_id(), suffix))
                .map_err(entity_id_error)?;
            if !taken(&candidate) {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    /// Remove every thermostat of this platform
    pub async fn unload(&self) {
        let mut entities = self.entities.lock().await;
        self.unload_locked(&mut entities).await;
    }

    async fn unload_locked(&self, entities: &mut Vec<Arc<DualModeThermostat>>) {
        for thermostat in entities.drain(..) {
            self.component.remove_entity(thermostat.entity_id());
            thermostat.remove().await;
        }
    }

    /// Re-read the configuration file and replace all thermostats
    ///
    /// The running thermostats are left untouched if the file cannot be read.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> PlatformResult<Vec<EntityId>> {
        let path = self.config_path.as_ref().ok_or(PlatformError::NoConfigFile)?;
        let configs = load_platform_configs(path).await?;

        let mut entities = self.entities.lock().await;
        self.unload_locked(&mut entities).await;
        let added = self.setup_locked(&mut entities, configs).await?;
        info!(count = added.len(), "Reloaded dual-mode thermostats");
        Ok(added)
    }

    /// Register `<platform>.reload` for each accepted platform name
    pub fn register_reload_service(self: &Arc<Self>) {
        for domain in PLATFORMS {
            let platform: Weak<Self> = Arc::downgrade(self);
            let mut description = ServiceDescription::new(domain, SERVICE_RELOAD);
            description.name = Some("Reload".to_string());
            description.description =
                Some("Reload all dual-mode thermostats from configuration".to_string());

            self.hass
                .services
                .register_with_description(description, move |_call: ServiceCall| {
                    let platform = platform.upgrade();
                    async move {
                        let Some(platform) = platform else {
                            warn!("Reload called after the platform was dropped");
                            return Err(ServiceError::CallFailed("platform unloaded".to_string()));
                        };
                        platform
                            .reload()
                            .await
                            .map(|_| None)
                            .map_err(|e| ServiceError::CallFailed(e.to_string()))
                    }
                });
        }
    }

    pub async fn entities(&self) -> Vec<Arc<DualModeThermostat>> {
        self.entities.lock().await.clone()
    }

    pub async fn entity(&self, entity_id: &EntityId) -> Option<Arc<DualModeThermostat>> {
        self.entities
            .lock()
            .await
            .iter()
            .find(|e| e.entity_id() == entity_id)
            .cloned()
    }
}
