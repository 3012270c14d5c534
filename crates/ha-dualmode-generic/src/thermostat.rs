//! The dual-mode thermostat entity
//!
//! A `DualModeThermostat` exposes `heat_cool` on top of a climate entity that
//! can only heat or cool at any one time. It follows the wrapped entity (and
//! an optional temperature sensor) through state-change tracking, decides
//! with [`control::decide`] which mode and setpoint the wrapped entity should
//! run, and commands it through the `climate.*` services.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use ha_climate::consts::{
    ATTR_CURRENT_TEMPERATURE, ATTR_FAN_MODE, ATTR_FAN_MODES, ATTR_HVAC_MODE, ATTR_HVAC_MODES,
    ATTR_MAX_TEMP, ATTR_MIN_TEMP, ATTR_PRESET_MODE, ATTR_PRESET_MODES, ATTR_SWING_MODE, ATTR_SWING_MODES,
    ATTR_TARGET_TEMP_HIGH, ATTR_TARGET_TEMP_LOW, ATTR_TARGET_TEMP_STEP, ATTR_TEMPERATURE,
    ATTR_UNIT_OF_MEASUREMENT, DOMAIN as CLIMATE_DOMAIN, SERVICE_SET_FAN_MODE,
    SERVICE_SET_HVAC_MODE, SERVICE_SET_PRESET_MODE, SERVICE_SET_SWING_MODE,
    SERVICE_SET_TEMPERATURE,
};
use ha_climate::{
    consts, ClimateEntity, ClimateEntityFeature, ClimateError, ClimateResult,
    ClimateStateSnapshot, HvacAction, HvacMode, SetTemperature,
};
use ha_core::events::HOMEASSISTANT_START;
use ha_core::{Context, EntityId, State, ATTR_ENTITY_ID};
use ha_event_bus::{StateChangeTracker, TrackedChange};
use ha_hass::{HomeAssistant, TemperatureUnit};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ThermostatConfig;
use crate::control::{self, Command, Setpoints, Tolerances, WrappedClimate};

/// Features advertised by every thermostat
pub const SUPPORT_FLAGS: ClimateEntityFeature = ClimateEntityFeature::from_bits(
    ClimateEntityFeature::TARGET_TEMPERATURE.bits()
        | ClimateEntityFeature::TARGET_TEMPERATURE_RANGE.bits()
        | ClimateEntityFeature::FAN_MODE.bits()
        | ClimateEntityFeature::PRESET_MODE.bits()
        | ClimateEntityFeature::SWING_MODE.bits(),
);

#[derive(Debug, Clone)]
struct ThermostatState {
    hvac_mode: HvacMode,
    current_temperature: Option<f64>,
    setpoints: Setpoints,
    /// Set once the inputs for control are first known
    active: bool,
}

/// Which tracked entity an event came from
#[derive(Debug, Clone, Copy)]
enum Source {
    Wrapped,
    Sensor,
}

pub struct DualModeThermostat {
    hass: Arc<HomeAssistant>,
    entity_id: EntityId,
    config: ThermostatConfig,
    state: Mutex<ThermostatState>,
    /// Held while handling an event or setter, outbound call included
    control_lock: Mutex<()>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl DualModeThermostat {
    pub fn new(hass: Arc<HomeAssistant>, entity_id: EntityId, config: ThermostatConfig) -> Arc<Self> {
        let state = ThermostatState {
            hvac_mode: config.initial_hvac_mode.unwrap_or(HvacMode::Off),
            current_temperature: None,
            setpoints: Setpoints {
                target_temp: config.target_temp,
                target_temp_low: config.target_temp_low,
                target_temp_high: config.target_temp_high,
            },
            active: false,
        };

        Arc::new(Self {
            hass,
            entity_id,
            config,
            state: Mutex::new(state),
            control_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.config.unique_id.as_deref()
    }

    pub async fn hvac_mode(&self) -> HvacMode {
        self.state.lock().await.hvac_mode
    }

    pub async fn current_temperature(&self) -> Option<f64> {
        self.state.lock().await.current_temperature
    }

    pub async fn setpoints(&self) -> Setpoints {
        self.state.lock().await.setpoints
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    /// Start tracking, restore the previous state and sync with the wrapped entity
    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    pub async fn added_to_hass(self: &Arc<Self>) {
        // Subscribe before restoring so no change is missed in between
        let wrapped = self
            .hass
            .bus
            .track_state_change([self.config.climate_entity_id.clone()]);
        let sensor = self
            .config
            .sensor_entity_id
            .clone()
            .map(|sensor| self.hass.bus.track_state_change([sensor]));

        self.restore().await;
        self.hass.restore.register_entity(&self.entity_id);

        let mut listeners = vec![self.spawn_tracker(wrapped, Source::Wrapped)];
        if let Some(sensor) = sensor {
            listeners.push(self.spawn_tracker(sensor, Source::Sensor));
        }

        if self.hass.is_running() {
            self.startup().await;
        } else {
            let started = self.hass.bus.listen_once(HOMEASSISTANT_START);
            let thermostat = Arc::downgrade(self);
            listeners.push(tokio::spawn(async move {
                if started.await.is_some() {
                    if let Some(thermostat) = thermostat.upgrade() {
                        thermostat.startup().await;
                    }
                }
            }));
        }

        *self.listeners.lock().await = listeners;
        info!(climate_entity_id = %self.config.climate_entity_id, "Thermostat added");
    }

    /// Stop tracking and drop the entity's state
    ///
    /// The current state is kept as the last state so a thermostat set up
    /// again (on reload) restores it.
    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    pub async fn remove(&self) {
        for listener in self.listeners.lock().await.drain(..) {
            listener.abort();
        }

        if let Some(state) = self.hass.states.get(&self.entity_id.to_string()) {
            self.hass.restore.insert_last_state(state);
        }
        self.hass.restore.unregister_entity(&self.entity_id);
        self.hass.states.remove(&self.entity_id, Context::new());
        info!("Thermostat removed");
    }

    fn spawn_tracker(
        self: &Arc<Self>,
        mut tracker: StateChangeTracker,
        source: Source,
    ) -> JoinHandle<()> {
        let thermostat: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(change) = tracker.recv().await {
                let Some(thermostat) = thermostat.upgrade() else {
                    break;
                };
                // After a lag the current state is re-read like after any change
                let context = match change {
                    TrackedChange::Changed(event) => event.context.child(),
                    TrackedChange::Resync { .. } => Context::new(),
                };
                match source {
                    Source::Wrapped => thermostat.wrapped_state_changed(&context).await,
                    Source::Sensor => thermostat.sensor_state_changed(&context).await,
                }
            }
        })
    }

    async fn restore(&self) {
        let last_state = self.hass.restore.last_state(&self.entity_id);
        let restored = |key: &str| {
            last_state
                .as_ref()
                .and_then(|s| s.numeric_attribute(key))
                .and_then(Result::ok)
        };
        let (min_temp, max_temp) = self.temperature_limits(self.wrapped_state().as_ref());

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.hvac_mode = self
            .config
            .initial_hvac_mode
            .or_else(|| last_state.as_ref().and_then(|s| s.state.parse().ok()))
            .unwrap_or(HvacMode::Off);

        let setpoints = &mut state.setpoints;
        setpoints.target_temp = self.config.target_temp.or_else(|| restored(ATTR_TEMPERATURE));
        if setpoints.target_temp.is_none() {
            let fallback = match state.hvac_mode {
                HvacMode::Cool | HvacMode::FanOnly => max_temp,
                _ => min_temp,
            };
            warn!(target_temp = fallback, "No target temperature configured or saved, falling back");
            state.setpoints.target_temp = Some(fallback);
        }

        let setpoints = &mut state.setpoints;
        setpoints.target_temp_low = self
            .config
            .target_temp_low
            .or_else(|| restored(ATTR_TARGET_TEMP_LOW))
            .or(Some(min_temp));
        setpoints.target_temp_high = self
            .config
            .target_temp_high
            .or_else(|| restored(ATTR_TARGET_TEMP_HIGH))
            .or(Some(max_temp));

        debug!(
            hvac_mode = %state.hvac_mode,
            setpoints = ?state.setpoints,
            restored = last_state.is_some(),
            "Restored thermostat state"
        );
    }

    async fn startup(&self) {
        let _guard = self.control_lock.lock().await;
        match self.wrapped_state() {
            Some(wrapped) => {
                info!(entity_id = %self.entity_id, "Updating internal state from wrapped entity on startup");
                self.apply_wrapped_state(&wrapped).await;
            }
            None => info!(
                entity_id = %self.entity_id,
                climate_entity_id = %self.config.climate_entity_id,
                "Wrapped entity not available on startup"
            ),
        }

        if let Some(sensor) = &self.config.sensor_entity_id {
            if let Some(state) = self.hass.states.get(&sensor.to_string()) {
                self.apply_sensor_state(&state).await;
            }
        }

        self.write_ha_state(&Context::new()).await;
    }

    // Handlers read the tracked entity's current state rather than the event
    // payload: by the time the control lock is taken the payload may be stale.

    async fn wrapped_state_changed(&self, context: &Context) {
        let _guard = self.control_lock.lock().await;
        info!(entity_id = %self.entity_id, "Wrapped entity state changed");
        if let Some(wrapped) = self.wrapped_state() {
            self.apply_wrapped_state(&wrapped).await;
        }
        self.control(false, context).await;
        self.write_ha_state(context).await;
    }

    async fn sensor_state_changed(&self, context: &Context) {
        let _guard = self.control_lock.lock().await;
        let sensor = self
            .config
            .sensor_entity_id
            .as_ref()
            .and_then(|sensor| self.hass.states.get(&sensor.to_string()));
        let Some(sensor) = sensor else {
            debug!(entity_id = %self.entity_id, "Sensor removed");
            return;
        };
        if self.apply_sensor_state(&sensor).await {
            self.control(false, context).await;
            self.write_ha_state(context).await;
        }
    }

    /// Take the current temperature, active setpoint and mode from the wrapped entity
    async fn apply_wrapped_state(&self, wrapped: &State) {
        if !wrapped.is_available() {
            debug!(entity_id = %self.entity_id, state = %wrapped.state, "Wrapped entity state is not available");
            return;
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if self.config.sensor_entity_id.is_none() {
            match wrapped.numeric_attribute(ATTR_CURRENT_TEMPERATURE) {
                Some(Ok(temp)) => {
                    debug!(current_temperature = temp, "New current temperature from wrapped entity");
                    state.current_temperature = Some(temp);
                }
                Some(Err(e)) => error!(entity_id = %self.entity_id, error = %e, "Unable to update current temperature"),
                None => debug!("Wrapped entity reports no current temperature"),
            }
        }

        let wrapped_mode = wrapped.state.parse::<HvacMode>().ok();

        match wrapped.numeric_attribute(ATTR_TEMPERATURE) {
            Some(Ok(temp)) => {
                let setpoints = &mut state.setpoints;
                let slot = match (wrapped_mode, state.hvac_mode) {
                    (Some(HvacMode::Heat), HvacMode::HeatCool) => Some(&mut setpoints.target_temp_low),
                    (Some(HvacMode::Heat), HvacMode::Heat) => Some(&mut setpoints.target_temp),
                    (Some(HvacMode::Cool), HvacMode::HeatCool) => Some(&mut setpoints.target_temp_high),
                    (Some(HvacMode::Cool), HvacMode::Cool) => Some(&mut setpoints.target_temp),
                    _ => None,
                };
                if let Some(slot) = slot {
                    if *slot != Some(temp) {
                        info!(entity_id = %self.entity_id, old = ?slot, new = temp, "Setpoint changed on wrapped entity");
                        *slot = Some(temp);
                    }
                }
            }
            Some(Err(e)) => error!(entity_id = %self.entity_id, error = %e, "Unable to update target temperature"),
            None => debug!("Wrapped entity reports no target temperature"),
        }

        let Some(wrapped_mode) = wrapped_mode else {
            warn!(entity_id = %self.entity_id, state = %wrapped.state, "Wrapped entity state is not an hvac mode");
            return;
        };
        let adopt = match state.hvac_mode {
            HvacMode::HeatCool => !matches!(wrapped_mode, HvacMode::Heat | HvacMode::Cool),
            current => current != wrapped_mode,
        };
        if adopt {
            info!(
                entity_id = %self.entity_id,
                wrapped_mode = %wrapped_mode,
                hvac_mode = %state.hvac_mode,
                "Wrapped entity changed mode, following it"
            );
            state.hvac_mode = wrapped_mode;
        }
    }

    /// Take the current temperature from the sensor; whether it was updated
    async fn apply_sensor_state(&self, sensor: &State) -> bool {
        if !sensor.is_available() {
            debug!(sensor = %sensor.entity_id, state = %sensor.state, "Sensor state is not available");
            return false;
        }
        match sensor.state.trim().parse::<f64>() {
            Ok(temp) => {
                self.state.lock().await.current_temperature = Some(temp);
                true
            }
            Err(e) => {
                error!(sensor = %sensor.entity_id, state = %sensor.state, error = %e, "Unable to update from sensor");
                false
            }
        }
    }

    /// One control pass; the caller holds `control_lock`
    ///
    /// With `force` the minimum cycle duration is ignored.
    #[instrument(skip(self, context), fields(entity_id = %self.entity_id))]
    async fn control(&self, force: bool, context: &Context) {
        let (hvac_mode, current, setpoints) = {
            let mut state = self.state.lock().await;
            if !state.active
                && state.current_temperature.is_some()
                && state.setpoints.ready_for(state.hvac_mode)
            {
                state.active = true;
                info!(
                    current_temperature = ?state.current_temperature,
                    setpoints = ?state.setpoints,
                    "Obtained current and target temperature, thermostat active"
                );
            }
            match state.current_temperature {
                Some(current) if state.active => (state.hvac_mode, current, state.setpoints),
                _ => {
                    debug!("Thermostat not active yet");
                    return;
                }
            }
        };

        let Some(wrapped_state) = self.wrapped_state().filter(State::is_available) else {
            debug!("Wrapped entity not available, skipping control");
            return;
        };

        if hvac_mode != HvacMode::Off && !force {
            if let Some(min_cycle) = self.config.min_cycle_duration {
                let held = self.hass.states.state_held_for(
                    &self.config.climate_entity_id.to_string(),
                    &wrapped_state.state,
                    min_cycle,
                    Utc::now(),
                );
                if !held {
                    debug!(wrapped_mode = %wrapped_state.state, ?min_cycle, "Minimum cycle duration not reached");
                    return;
                }
            }
        }

        let tolerances = Tolerances {
            cold: self.config.cold_tolerance,
            hot: self.config.hot_tolerance,
        };
        let wrapped = WrappedClimate::from_state(&wrapped_state);
        if let Some(command) = control::decide(hvac_mode, current, &setpoints, tolerances, &wrapped) {
            self.send(command, context).await;
        }
    }

    async fn send(&self, command: Command, context: &Context) {
        let (service, data) = match command {
            Command::SetHvacMode(hvac_mode) => (
                SERVICE_SET_HVAC_MODE,
                self.wrapped_service_data([(ATTR_HVAC_MODE, json!(hvac_mode))]),
            ),
            Command::SetTemperature {
                temperature,
                hvac_mode: Some(hvac_mode),
            } => (
                SERVICE_SET_TEMPERATURE,
                self.wrapped_service_data([
                    (ATTR_TEMPERATURE, json!(temperature)),
                    (ATTR_HVAC_MODE, json!(hvac_mode)),
                ]),
            ),
            Command::SetTemperature {
                temperature,
                hvac_mode: None,
            } => (
                SERVICE_SET_TEMPERATURE,
                self.wrapped_service_data([(ATTR_TEMPERATURE, json!(temperature))]),
            ),
        };

        info!(service, ?command, climate_entity_id = %self.config.climate_entity_id, "Commanding wrapped entity");
        if let Err(e) = self
            .hass
            .services
            .call(CLIMATE_DOMAIN, service, data, context.child(), false)
            .await
        {
            error!(service, error = %e, "Failed to command wrapped entity");
        }
    }

    fn wrapped_service_data<'a>(&self, fields: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
        let mut data = serde_json::Map::new();
        data.insert(
            ATTR_ENTITY_ID.to_string(),
            json!(self.config.climate_entity_id.to_string()),
        );
        for (key, value) in fields {
            data.insert(key.to_string(), value);
        }
        Value::Object(data)
    }

    /// Forward a fan, swing or preset mode to the wrapped entity
    async fn forward_mode(
        &self,
        kind: &'static str,
        list_attr: &str,
        service: &str,
        value: &str,
        context: &Context,
    ) -> ClimateResult<()> {
        let wrapped = self
            .wrapped_state()
            .ok_or_else(|| ClimateError::Unavailable(self.config.climate_entity_id.clone()))?;

        if let Some(available) = wrapped.attribute::<Vec<String>>(list_attr) {
            if !available.iter().any(|mode| mode == value) {
                error!(entity_id = %self.entity_id, kind, value, "Unrecognized mode");
                return Err(ClimateError::UnsupportedMode {
                    kind,
                    value: value.to_string(),
                    available,
                });
            }
        }

        let data = self.wrapped_service_data([(kind, json!(value))]);
        self.hass
            .services
            .call(CLIMATE_DOMAIN, service, data, context.child(), false)
            .await
            .map_err(|e| {
                error!(service, error = %e, "Failed to forward to wrapped entity");
                ClimateError::from(e)
            })?;

        self.write_ha_state(context).await;
        Ok(())
    }

    fn wrapped_state(&self) -> Option<State> {
        self.hass
            .states
            .get(&self.config.climate_entity_id.to_string())
    }

    fn temperature_unit(&self, wrapped: Option<&State>) -> TemperatureUnit {
        wrapped
            .and_then(|s| s.attribute::<String>(ATTR_UNIT_OF_MEASUREMENT))
            .and_then(|unit| TemperatureUnit::from_unit(&unit))
            .unwrap_or_else(|| self.hass.temperature_unit())
    }

    /// `min_temp` and `max_temp` of the wrapped entity, else the climate defaults
    fn temperature_limits(&self, wrapped: Option<&State>) -> (f64, f64) {
        let unit = self.temperature_unit(wrapped);
        let read = |key: &str| {
            wrapped
                .and_then(|s| s.numeric_attribute(key))
                .and_then(Result::ok)
        };
        (
            read(ATTR_MIN_TEMP).unwrap_or_else(|| consts::default_min_temp(unit)),
            read(ATTR_MAX_TEMP).unwrap_or_else(|| consts::default_max_temp(unit)),
        )
    }

    /// `heat_cool` followed by the wrapped entity's modes
    ///
    /// Empty while the wrapped entity has no state or advertises no modes.
    fn available_hvac_modes(wrapped: Option<&State>) -> Vec<HvacMode> {
        let Some(wrapped) = wrapped.filter(|s| s.attributes.contains_key(ATTR_HVAC_MODES)) else {
            return Vec::new();
        };
        let mut modes = vec![HvacMode::HeatCool];
        for mode in WrappedClimate::from_state(wrapped).hvac_modes {
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }
        modes
    }

    pub async fn hvac_action(&self) -> HvacAction {
        let state = self.state.lock().await.clone();
        let wrapped_mode = self.wrapped_state().and_then(|s| s.state.parse().ok());
        hvac_action(&state, wrapped_mode)
    }

    async fn snapshot(&self) -> ClimateStateSnapshot {
        let state = self.state.lock().await.clone();
        let wrapped = self.wrapped_state();
        let wrapped = wrapped.as_ref();
        let wrapped_mode = wrapped.and_then(|s| s.state.parse().ok());

        let mut snapshot = ClimateStateSnapshot::new(self.temperature_unit(wrapped));
        (snapshot.min_temp, snapshot.max_temp) = self.temperature_limits(wrapped);
        snapshot.hvac_mode = Some(state.hvac_mode);
        snapshot.hvac_modes = Self::available_hvac_modes(wrapped);
        snapshot.hvac_action = Some(hvac_action(&state, wrapped_mode));
        snapshot.current_temperature = state.current_temperature;
        snapshot.target_temperature = state.setpoints.target_temp;
        snapshot.target_temperature_low = state.setpoints.target_temp_low;
        snapshot.target_temperature_high = state.setpoints.target_temp_high;
        snapshot.supported_features = SUPPORT_FLAGS;
        snapshot.friendly_name = Some(self.config.name.clone());

        if let Some(wrapped) = wrapped {
            snapshot.target_temperature_step = wrapped
                .numeric_attribute(ATTR_TARGET_TEMP_STEP)
                .and_then(Result::ok);
            if let Some(step) = snapshot.target_temperature_step {
                snapshot.precision = step;
            }
            if let Some(unit) = wrapped.attribute::<String>(ATTR_UNIT_OF_MEASUREMENT) {
                snapshot.unit_of_measurement = unit;
            }
            snapshot.fan_mode = wrapped.attribute(ATTR_FAN_MODE);
            snapshot.fan_modes = wrapped.attribute(ATTR_FAN_MODES);
            snapshot.swing_mode = wrapped.attribute(ATTR_SWING_MODE);
            snapshot.swing_modes = wrapped.attribute(ATTR_SWING_MODES);
            snapshot.preset_mode = wrapped.attribute(ATTR_PRESET_MODE);
            snapshot.preset_modes = wrapped.attribute(ATTR_PRESET_MODES);
        }

        snapshot
    }

    async fn write_ha_state(&self, context: &Context) {
        let snapshot = self.snapshot().await;
        self.hass.states.set(
            self.entity_id.clone(),
            snapshot.state(),
            snapshot.state_attributes(),
            context.clone(),
        );
    }
}

fn hvac_action(state: &ThermostatState, wrapped_mode: Option<HvacMode>) -> HvacAction {
    let current = state.current_temperature;
    let above = |target: Option<f64>| matches!((current, target), (Some(c), Some(t)) if c > t);
    let below = |target: Option<f64>| matches!((current, target), (Some(c), Some(t)) if c < t);
    let setpoints = &state.setpoints;

    match state.hvac_mode {
        HvacMode::Off => HvacAction::Off,
        HvacMode::Cool if above(setpoints.target_temp) => HvacAction::Cooling,
        HvacMode::Heat if below(setpoints.target_temp) => HvacAction::Heating,
        HvacMode::FanOnly => HvacAction::Fan,
        HvacMode::Dry => HvacAction::Drying,
        HvacMode::HeatCool => match wrapped_mode {
            Some(HvacMode::Heat) if below(setpoints.target_temp_low) => HvacAction::Heating,
            Some(HvacMode::Cool) if above(setpoints.target_temp_high) => HvacAction::Cooling,
            Some(HvacMode::Heat | HvacMode::Cool) => HvacAction::Idle,
            other => {
                info!(wrapped_mode = ?other, "Wrapped entity in unexpected mode, assuming idle");
                HvacAction::Idle
            }
        },
        _ => HvacAction::Idle,
    }
}

#[async_trait]
impl ClimateEntity for DualModeThermostat {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    #[instrument(skip(self, context), fields(entity_id = %self.entity_id))]
    async fn set_hvac_mode(&self, hvac_mode: HvacMode, context: &Context) -> ClimateResult<()> {
        let available = Self::available_hvac_modes(self.wrapped_state().as_ref());
        if !available.contains(&hvac_mode) {
            error!(hvac_mode = %hvac_mode, "Unrecognized hvac mode");
            return Err(ClimateError::UnsupportedHvacMode {
                mode: hvac_mode,
                available,
            });
        }

        let _guard = self.control_lock.lock().await;
        self.state.lock().await.hvac_mode = hvac_mode;
        self.control(true, context).await;
        self.write_ha_state(context).await;
        Ok(())
    }

    #[instrument(skip(self, context), fields(entity_id = %self.entity_id))]
    async fn set_temperature(&self, request: SetTemperature, context: &Context) -> ClimateResult<()> {
        if let Some(hvac_mode) = request.hvac_mode {
            let available = Self::available_hvac_modes(self.wrapped_state().as_ref());
            if !available.contains(&hvac_mode) {
                error!(hvac_mode = %hvac_mode, "Unrecognized hvac mode");
                return Err(ClimateError::UnsupportedHvacMode {
                    mode: hvac_mode,
                    available,
                });
            }
        }

        let _guard = self.control_lock.lock().await;
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let low = request.target_temp_low.or(state.setpoints.target_temp_low);
            let high = request.target_temp_high.or(state.setpoints.target_temp_high);
            if let (Some(low), Some(high)) = (low, high) {
                if low > high {
                    return Err(ClimateError::InvalidTemperatureRange { low, high });
                }
            }

            if let Some(hvac_mode) = request.hvac_mode {
                state.hvac_mode = hvac_mode;
            }
            let setpoints = &mut state.setpoints;
            if request.temperature.is_some() {
                setpoints.target_temp = request.temperature;
            }
            setpoints.target_temp_low = low;
            setpoints.target_temp_high = high;
            debug!(setpoints = ?setpoints, "Setpoints updated");
        }

        self.control(true, context).await;
        self.write_ha_state(context).await;
        Ok(())
    }

    async fn set_fan_mode(&self, fan_mode: &str, context: &Context) -> ClimateResult<()> {
        self.forward_mode(ATTR_FAN_MODE, ATTR_FAN_MODES, SERVICE_SET_FAN_MODE, fan_mode, context)
            .await
    }

    async fn set_swing_mode(&self, swing_mode: &str, context: &Context) -> ClimateResult<()> {
        self.forward_mode(
            ATTR_SWING_MODE,
            ATTR_SWING_MODES,
            SERVICE_SET_SWING_MODE,
            swing_mode,
            context,
        )
        .await
    }

    async fn set_preset_mode(&self, preset_mode: &str, context: &Context) -> ClimateResult<()> {
        self.forward_mode(
            ATTR_PRESET_MODE,
            ATTR_PRESET_MODES,
            SERVICE_SET_PRESET_MODE,
            preset_mode,
            context,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(hvac_mode: HvacMode, current: f64) -> ThermostatState {
        ThermostatState {
            hvac_mode,
            current_temperature: Some(current),
            setpoints: Setpoints {
                target_temp: Some(21.0),
                target_temp_low: Some(19.0),
                target_temp_high: Some(24.0),
            },
            active: true,
        }
    }

    #[test]
    fn test_support_flags() {
        assert_eq!(SUPPORT_FLAGS.bits(), 59);
    }

    #[test]
    fn test_hvac_action_single_modes() {
        assert_eq!(hvac_action(&state(HvacMode::Off, 30.0), None), HvacAction::Off);
        assert_eq!(hvac_action(&state(HvacMode::Cool, 22.0), None), HvacAction::Cooling);
        assert_eq!(hvac_action(&state(HvacMode::Cool, 21.0), None), HvacAction::Idle);
        assert_eq!(hvac_action(&state(HvacMode::Heat, 20.0), None), HvacAction::Heating);
        assert_eq!(hvac_action(&state(HvacMode::Heat, 21.5), None), HvacAction::Idle);
        assert_eq!(hvac_action(&state(HvacMode::FanOnly, 20.0), None), HvacAction::Fan);
        assert_eq!(hvac_action(&state(HvacMode::Dry, 20.0), None), HvacAction::Drying);
    }

    #[test]
    fn test_hvac_action_heat_cool_follows_wrapped_mode() {
        let heat_cool = |current| state(HvacMode::HeatCool, current);

        assert_eq!(
            hvac_action(&heat_cool(18.0), Some(HvacMode::Heat)),
            HvacAction::Heating
        );
        assert_eq!(
            hvac_action(&heat_cool(20.0), Some(HvacMode::Heat)),
            HvacAction::Idle
        );
        assert_eq!(
            hvac_action(&heat_cool(25.0), Some(HvacMode::Cool)),
            HvacAction::Cooling
        );
        assert_eq!(
            hvac_action(&heat_cool(23.0), Some(HvacMode::Cool)),
            HvacAction::Idle
        );
        assert_eq!(hvac_action(&heat_cool(23.0), Some(HvacMode::Dry)), HvacAction::Idle);
        assert_eq!(hvac_action(&heat_cool(23.0), None), HvacAction::Idle);
    }

    #[test]
    fn test_hvac_action_without_current_temperature() {
        let mut unknown = state(HvacMode::Heat, 0.0);
        unknown.current_temperature = None;
        assert_eq!(hvac_action(&unknown, None), HvacAction::Idle);
    }
}
