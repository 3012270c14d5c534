use dashmap::DashMap;
use futures::future::join_all;
use ha_core::{EntityId, ServiceCall};
use ha_service_registry::{ServiceDescription, ServiceError, ServiceRegistry, ServiceResult};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::consts::{
    ATTR_FAN_MODE, ATTR_HVAC_MODE, ATTR_PRESET_MODE, ATTR_SWING_MODE, DOMAIN,
    SERVICE_SET_FAN_MODE, SERVICE_SET_HVAC_MODE, SERVICE_SET_PRESET_MODE,
    SERVICE_SET_SWING_MODE, SERVICE_SET_TEMPERATURE,
};
use crate::{ClimateEntity, HvacMode, SetTemperature};

/// Owner of the `climate.*` services
///
/// Every climate entity, whatever platform it comes from, is added here.
/// A service call is routed to each entity named in its `entity_id`.
#[derive(Default)]
pub struct ClimateComponent {
    entities: DashMap<EntityId, Arc<dyn ClimateEntity>>,
}

/// Which entity method a service call maps onto
#[derive(Debug, Clone)]
enum ClimateCommand {
    HvacMode(HvacMode),
    Temperature(SetTemperature),
    FanMode(String),
    SwingMode(String),
    PresetMode(String),
}

impl ClimateCommand {
    fn parse(service: &str, call: &ServiceCall) -> Result<Self, ServiceError> {
        let required = |key: &str| {
            call.get::<String>(key)
                .ok_or_else(|| ServiceError::InvalidData(format!("{} is required", key)))
        };

        match service {
            SERVICE_SET_HVAC_MODE => {
                let mode = required(ATTR_HVAC_MODE)?;
                mode.parse()
                    .map(ClimateCommand::HvacMode)
                    .map_err(|e| ServiceError::InvalidData(format!("{}", e)))
            }
            SERVICE_SET_TEMPERATURE => {
                SetTemperature::from_service_data(&call.service_data).map(ClimateCommand::Temperature)
            }
            SERVICE_SET_FAN_MODE => required(ATTR_FAN_MODE).map(ClimateCommand::FanMode),
            SERVICE_SET_SWING_MODE => required(ATTR_SWING_MODE).map(ClimateCommand::SwingMode),
            SERVICE_SET_PRESET_MODE => required(ATTR_PRESET_MODE).map(ClimateCommand::PresetMode),
            other => Err(ServiceError::NotFound {
                domain: DOMAIN.to_string(),
                service: other.to_string(),
            }),
        }
    }
}

impl ClimateComponent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an entity; an entity with the same id is replaced
    pub fn add_entity(&self, entity: Arc<dyn ClimateEntity>) {
        let entity_id = entity.entity_id().clone();
        if self.entities.insert(entity_id.clone(), entity).is_some() {
            warn!(entity_id = %entity_id, "Replaced existing climate entity");
        } else {
            debug!(entity_id = %entity_id, "Added climate entity");
        }
    }

    pub fn remove_entity(&self, entity_id: &EntityId) -> Option<Arc<dyn ClimateEntity>> {
        self.entities.remove(entity_id).map(|(_, entity)| entity)
    }

    pub fn entity(&self, entity_id: &EntityId) -> Option<Arc<dyn ClimateEntity>> {
        self.entities.get(entity_id).map(|e| e.value().clone())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Register the climate services on the registry
    pub fn register_services(self: &Arc<Self>, services: &ServiceRegistry) {
        let described = [
            (SERVICE_SET_HVAC_MODE, "Set HVAC mode", "Set the operating mode"),
            (SERVICE_SET_TEMPERATURE, "Set target temperature", "Set the target temperature or range"),
            (SERVICE_SET_FAN_MODE, "Set fan mode", "Set the fan mode"),
            (SERVICE_SET_SWING_MODE, "Set swing mode", "Set the swing mode"),
            (SERVICE_SET_PRESET_MODE, "Set preset mode", "Set the preset mode"),
        ];

        for (service, name, description) in described {
            let component = self.clone();
            let mut desc = ServiceDescription::new(DOMAIN, service);
            desc.name = Some(name.to_string());
            desc.description = Some(description.to_string());
            desc.target = Some(json!({"entity": {"domain": DOMAIN}}));

            services.register_with_description(desc, move |call: ServiceCall| {
                let component = component.clone();
                async move { component.handle(service, call).await }
            });
        }

        info!("Climate services registered");
    }

    async fn handle(&self, service: &'static str, call: ServiceCall) -> ServiceResult {
        let command = ClimateCommand::parse(service, &call)?;
        let targets: Vec<_> = call
            .entity_ids()
            .into_iter()
            .filter_map(|entity_id| match self.entity(&entity_id) {
                Some(entity) => Some((entity_id, entity)),
                None => {
                    warn!(entity_id = %entity_id, service, "No climate entity to handle call");
                    None
                }
            })
            .collect();

        // Targets are handled concurrently; the first failure is returned
        let results = join_all(targets.iter().map(|(_, entity)| {
            let context = &call.context;
            let command = &command;
            async move {
                match command {
                    ClimateCommand::HvacMode(mode) => entity.set_hvac_mode(*mode, context).await,
                    ClimateCommand::Temperature(request) => {
                        entity.set_temperature(request.clone(), context).await
                    }
                    ClimateCommand::FanMode(mode) => entity.set_fan_mode(mode, context).await,
                    ClimateCommand::SwingMode(mode) => entity.set_swing_mode(mode, context).await,
                    ClimateCommand::PresetMode(mode) => entity.set_preset_mode(mode, context).await,
                }
            }
        }))
        .await;

        let mut first_error = None;
        for ((entity_id, _), result) in targets.iter().zip(results) {
            if let Err(e) = result {
                error!(entity_id = %entity_id, service, error = %e, "Climate service failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }
}
