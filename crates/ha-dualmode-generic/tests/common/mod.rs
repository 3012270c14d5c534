//! Test harness for the dual-mode thermostat
//!
//! `TestHomeAssistant` wires a host, the climate component and the platform
//! together. `MockClimate` stands in for the wrapped heat pump: it records
//! every command and writes the resulting state like a real integration.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ha_climate::{
    ClimateComponent, ClimateEntity, ClimateError, ClimateResult, HvacMode, SetTemperature,
};
use ha_core::{Context, EntityId, State};
use ha_dualmode_generic::{parse_platform_configs, DualModePlatform, DualModeThermostat};
use ha_hass::{CoreConfig, HomeAssistant};
use ha_restore_state::RestoreStateStore;
use ha_service_registry::{ServiceError, ServiceResult};
use serde_json::{json, Value};

pub const HEAT_PUMP: &str = "climate.heat_pump";
pub const THERMOSTAT: &str = "climate.generic_thermostat";
pub const SENSOR: &str = "sensor.living_room_temperature";

/// A command received by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum ClimateCall {
    HvacMode(HvacMode),
    Temperature(SetTemperature),
    FanMode(String),
    SwingMode(String),
    PresetMode(String),
}

/// Wrapped climate entity that records the commands it receives
pub struct MockClimate {
    entity_id: EntityId,
    hass: Arc<HomeAssistant>,
    calls: Mutex<Vec<ClimateCall>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockClimate {
    /// A heat pump in `heat` at 19 °C reading 20 °C
    pub fn new(hass: Arc<HomeAssistant>, entity_id: &str) -> Arc<Self> {
        let mock = Arc::new(Self {
            entity_id: entity_id.parse().unwrap(),
            hass,
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        mock.write("heat", default_attributes());
        mock
    }

    pub fn calls(&self) -> Vec<ClimateCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Reject every command from now on
    pub fn fail_commands(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Keep every command outstanding for `delay` before it takes effect
    pub fn delay_commands(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Most commands ever handled at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> State {
        self.hass.states.get(&self.entity_id.to_string()).unwrap()
    }

    /// Change the state as the device would on its own
    pub fn write(&self, state: &str, attributes: HashMap<String, Value>) {
        self.hass
            .states
            .set(self.entity_id.clone(), state, attributes, Context::new());
    }

    /// Report a new room temperature, keeping everything else
    pub fn report_temperature(&self, current: Value) {
        self.update(None, |attrs| {
            attrs.insert("current_temperature".to_string(), current);
        });
    }

    /// Switch mode on the device itself
    pub fn switch_mode(&self, mode: &str) {
        self.update(Some(mode), |_| {});
    }

    fn update(&self, mode: Option<&str>, change: impl FnOnce(&mut HashMap<String, Value>)) {
        let current = self.state();
        let mut attributes = current.attributes.clone();
        change(&mut attributes);
        self.write(mode.unwrap_or(&current.state), attributes);
    }

    async fn record(&self, call: ClimateCall) -> ClimateResult<()> {
        self.calls.lock().unwrap().push(call);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(ClimateError::Service(ServiceError::CallFailed(
                "device offline".to_string(),
            )));
        }
        Ok(())
    }
}

pub fn default_attributes() -> HashMap<String, Value> {
    HashMap::from([
        ("current_temperature".to_string(), json!(20.0)),
        ("temperature".to_string(), json!(19.0)),
        (
            "hvac_modes".to_string(),
            json!(["off", "heat", "cool", "dry", "fan_only"]),
        ),
        ("min_temp".to_string(), json!(16)),
        ("max_temp".to_string(), json!(30)),
        ("target_temp_step".to_string(), json!(0.5)),
        ("fan_mode".to_string(), json!("auto")),
        ("fan_modes".to_string(), json!(["auto", "low", "high"])),
        ("swing_mode".to_string(), json!("off")),
        ("swing_modes".to_string(), json!(["off", "vertical"])),
        ("preset_mode".to_string(), json!("none")),
        ("preset_modes".to_string(), json!(["none", "eco"])),
    ])
}

#[async_trait]
impl ClimateEntity for MockClimate {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    async fn set_hvac_mode(&self, hvac_mode: HvacMode, _context: &Context) -> ClimateResult<()> {
        self.record(ClimateCall::HvacMode(hvac_mode)).await?;
        self.switch_mode(hvac_mode.as_str());
        Ok(())
    }

    async fn set_temperature(
        &self,
        request: SetTemperature,
        _context: &Context,
    ) -> ClimateResult<()> {
        self.record(ClimateCall::Temperature(request.clone())).await?;
        self.update(request.hvac_mode.map(|m| m.as_str()), |attrs| {
            if let Some(temperature) = request.temperature {
                attrs.insert("temperature".to_string(), json!(temperature));
            }
        });
        Ok(())
    }

    async fn set_fan_mode(&self, fan_mode: &str, _context: &Context) -> ClimateResult<()> {
        self.record(ClimateCall::FanMode(fan_mode.to_string())).await?;
        self.update(None, |attrs| {
            attrs.insert("fan_mode".to_string(), json!(fan_mode));
        });
        Ok(())
    }

    async fn set_swing_mode(&self, swing_mode: &str, _context: &Context) -> ClimateResult<()> {
        self.record(ClimateCall::SwingMode(swing_mode.to_string())).await?;
        self.update(None, |attrs| {
            attrs.insert("swing_mode".to_string(), json!(swing_mode));
        });
        Ok(())
    }

    async fn set_preset_mode(&self, preset_mode: &str, _context: &Context) -> ClimateResult<()> {
        self.record(ClimateCall::PresetMode(preset_mode.to_string())).await?;
        self.update(None, |attrs| {
            attrs.insert("preset_mode".to_string(), json!(preset_mode));
        });
        Ok(())
    }
}

/// A host with the climate component and the dual-mode platform loaded
pub struct TestHomeAssistant {
    pub hass: Arc<HomeAssistant>,
    pub component: Arc<ClimateComponent>,
    pub platform: Arc<DualModePlatform>,
}

impl TestHomeAssistant {
    /// A running host
    pub fn new() -> Self {
        let test = Self::not_running(RestoreStateStore::in_memory(), None);
        test.hass.start();
        test
    }

    /// A host still starting, with the given restore store and config file
    pub fn not_running(restore: RestoreStateStore, config_path: Option<PathBuf>) -> Self {
        let hass = Arc::new(HomeAssistant::with_config(CoreConfig::default(), restore));
        hass.set_starting();

        let component = ClimateComponent::new();
        component.register_services(&hass.services);

        let platform = DualModePlatform::new(hass.clone(), component.clone(), config_path);
        platform.register_reload_service();

        Self {
            hass,
            component,
            platform,
        }
    }

    pub fn mock_climate(&self, entity_id: &str) -> Arc<MockClimate> {
        let mock = MockClimate::new(self.hass.clone(), entity_id);
        self.component.add_entity(mock.clone());
        mock
    }

    /// Set up thermostats from a `climate:` YAML list
    pub async fn setup(&self, climate_yaml: &str) -> Vec<EntityId> {
        let configs = parse_platform_configs(&format!("climate:\n{}", climate_yaml)).unwrap();
        self.platform.setup(configs).await.unwrap()
    }

    pub async fn thermostat(&self, entity_id: &str) -> Arc<DualModeThermostat> {
        self.platform
            .entity(&entity_id.parse().unwrap())
            .await
            .unwrap()
    }

    pub fn state(&self, entity_id: &str) -> Option<State> {
        self.hass.states.get(entity_id)
    }

    pub fn attribute(&self, entity_id: &str, key: &str) -> Value {
        self.state(entity_id)
            .and_then(|s| s.attributes.get(key).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn set_state(&self, entity_id: &str, state: &str) {
        self.hass.states.set(
            entity_id.parse().unwrap(),
            state,
            HashMap::new(),
            Context::new(),
        );
    }

    /// Call a `climate.*` service
    pub async fn climate(&self, service: &str, data: Value) -> ServiceResult {
        self.hass
            .services
            .call("climate", service, data, Context::new(), false)
            .await
    }

    /// Run `trigger` and wait until the thermostat has written its state again
    pub async fn after_write(&self, entity_id: &str, trigger: impl FnOnce()) {
        settle().await;
        let before = self.state(entity_id).and_then(|s| s.last_reported);
        trigger();
        eventually("thermostat state write", || {
            self.state(entity_id).and_then(|s| s.last_reported) > before
        })
        .await;
    }
}

/// Let already queued state changes be handled
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Poll `check` until it holds, yielding to spawned tasks in between
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn set_temperature(temperature: f64, hvac_mode: Option<HvacMode>) -> ClimateCall {
    ClimateCall::Temperature(SetTemperature {
        temperature: Some(temperature),
        hvac_mode,
        ..SetTemperature::default()
    })
}
