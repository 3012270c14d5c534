//! Rendering a climate entity into its state string and attribute map

use std::collections::HashMap;

use ha_core::STATE_UNKNOWN;
use ha_hass::TemperatureUnit;
use serde_json::{json, Value};

use crate::consts::*;
use crate::{ClimateEntityFeature, HvacAction, HvacMode};

/// Round a temperature for display
///
/// Only the three standard precisions round; anything else is passed through.
pub fn round_to_precision(value: f64, precision: f64) -> f64 {
    if precision == PRECISION_TENTHS {
        (value * 10.0).round() / 10.0
    } else if precision == PRECISION_HALVES {
        (value * 2.0).round() / 2.0
    } else if precision == PRECISION_WHOLE {
        value.round()
    } else {
        value
    }
}

/// Everything needed to write a climate entity's state
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateStateSnapshot {
    pub hvac_mode: Option<HvacMode>,
    pub hvac_modes: Vec<HvacMode>,
    pub hvac_action: Option<HvacAction>,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub target_temperature_high: Option<f64>,
    pub target_temperature_low: Option<f64>,
    pub target_temperature_step: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub fan_mode: Option<String>,
    pub fan_modes: Option<Vec<String>>,
    pub swing_mode: Option<String>,
    pub swing_modes: Option<Vec<String>>,
    pub preset_mode: Option<String>,
    pub preset_modes: Option<Vec<String>>,
    pub supported_features: ClimateEntityFeature,
    pub unit_of_measurement: String,
    pub precision: f64,
    pub friendly_name: Option<String>,
}

impl ClimateStateSnapshot {
    /// Empty snapshot with the climate defaults for `unit`
    pub fn new(unit: TemperatureUnit) -> Self {
        Self {
            hvac_mode: None,
            hvac_modes: Vec::new(),
            hvac_action: None,
            current_temperature: None,
            target_temperature: None,
            target_temperature_high: None,
            target_temperature_low: None,
            target_temperature_step: None,
            min_temp: default_min_temp(unit),
            max_temp: default_max_temp(unit),
            fan_mode: None,
            fan_modes: None,
            swing_mode: None,
            swing_modes: None,
            preset_mode: None,
            preset_modes: None,
            supported_features: ClimateEntityFeature::empty(),
            unit_of_measurement: unit.as_str().to_string(),
            precision: default_precision(unit),
            friendly_name: None,
        }
    }

    /// State string: the hvac mode, or `unknown` before one is known
    pub fn state(&self) -> String {
        self.hvac_mode
            .map(|mode| mode.as_str().to_string())
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    }

    fn show_temp(&self, value: Option<f64>) -> Value {
        match value {
            Some(v) => json!(round_to_precision(v, self.precision)),
            None => Value::Null,
        }
    }

    pub fn state_attributes(&self) -> HashMap<String, Value> {
        let features = self.supported_features;
        let mut attrs = HashMap::new();
        let mut put = |key: &str, value: Value| {
            attrs.insert(key.to_string(), value);
        };

        let modes: Vec<&str> = self.hvac_modes.iter().map(HvacMode::as_str).collect();
        put(ATTR_HVAC_MODES, json!(modes));
        put(ATTR_MIN_TEMP, self.show_temp(Some(self.min_temp)));
        put(ATTR_MAX_TEMP, self.show_temp(Some(self.max_temp)));
        if let Some(step) = self.target_temperature_step {
            put(ATTR_TARGET_TEMP_STEP, json!(step));
        }
        put(ATTR_CURRENT_TEMPERATURE, self.show_temp(self.current_temperature));

        if features.contains(ClimateEntityFeature::TARGET_TEMPERATURE) {
            put(ATTR_TEMPERATURE, self.show_temp(self.target_temperature));
        }
        if features.contains(ClimateEntityFeature::TARGET_TEMPERATURE_RANGE) {
            put(ATTR_TARGET_TEMP_HIGH, self.show_temp(self.target_temperature_high));
            put(ATTR_TARGET_TEMP_LOW, self.show_temp(self.target_temperature_low));
        }
        if let Some(action) = self.hvac_action {
            put(ATTR_HVAC_ACTION, json!(action.as_str()));
        }
        if features.contains(ClimateEntityFeature::FAN_MODE) {
            put(ATTR_FAN_MODE, json!(self.fan_mode));
            put(ATTR_FAN_MODES, json!(self.fan_modes));
        }
        if features.contains(ClimateEntityFeature::SWING_MODE) {
            put(ATTR_SWING_MODE, json!(self.swing_mode));
            put(ATTR_SWING_MODES, json!(self.swing_modes));
        }
        if features.contains(ClimateEntityFeature::PRESET_MODE) {
            put(ATTR_PRESET_MODE, json!(self.preset_mode));
            put(ATTR_PRESET_MODES, json!(self.preset_modes));
        }

        put(ATTR_UNIT_OF_MEASUREMENT, json!(self.unit_of_measurement));
        put(ATTR_SUPPORTED_FEATURES, json!(features.bits()));
        if let Some(name) = &self.friendly_name {
            put(ATTR_FRIENDLY_NAME, json!(name));
        }

        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to_precision(21.46, PRECISION_TENTHS), 21.5);
        assert_eq!(round_to_precision(21.3, PRECISION_HALVES), 21.5);
        assert_eq!(round_to_precision(21.2, PRECISION_HALVES), 21.0);
        assert_eq!(round_to_precision(71.6, PRECISION_WHOLE), 72.0);
        assert_eq!(round_to_precision(21.234, 0.25), 21.234);
    }

    #[test]
    fn test_unknown_state_before_mode() {
        let snapshot = ClimateStateSnapshot::new(TemperatureUnit::Celsius);
        assert_eq!(snapshot.state(), "unknown");

        let snapshot = ClimateStateSnapshot {
            hvac_mode: Some(HvacMode::HeatCool),
            ..snapshot
        };
        assert_eq!(snapshot.state(), "heat_cool");
    }

    #[test]
    fn test_attributes_follow_features() {
        let mut snapshot = ClimateStateSnapshot::new(TemperatureUnit::Celsius);
        snapshot.hvac_modes = vec![HvacMode::HeatCool, HvacMode::Heat, HvacMode::Cool];
        snapshot.current_temperature = Some(20.04);
        snapshot.target_temperature = Some(21.0);
        snapshot.target_temperature_low = Some(19.0);
        snapshot.target_temperature_high = Some(24.0);
        snapshot.supported_features = ClimateEntityFeature::TARGET_TEMPERATURE;

        let attrs = snapshot.state_attributes();
        assert_eq!(attrs[ATTR_HVAC_MODES], json!(["heat_cool", "heat", "cool"]));
        assert_eq!(attrs[ATTR_CURRENT_TEMPERATURE], json!(20.0));
        assert_eq!(attrs[ATTR_TEMPERATURE], json!(21.0));
        assert_eq!(attrs[ATTR_MIN_TEMP], json!(7.0));
        assert!(!attrs.contains_key(ATTR_TARGET_TEMP_LOW));
        assert!(!attrs.contains_key(ATTR_FAN_MODE));
        assert!(!attrs.contains_key(ATTR_HVAC_ACTION));

        snapshot.supported_features |= ClimateEntityFeature::TARGET_TEMPERATURE_RANGE;
        snapshot.supported_features |= ClimateEntityFeature::FAN_MODE;
        snapshot.hvac_action = Some(HvacAction::Idle);
        snapshot.fan_modes = Some(vec!["auto".to_string(), "high".to_string()]);

        let attrs = snapshot.state_attributes();
        assert_eq!(attrs[ATTR_TARGET_TEMP_LOW], json!(19.0));
        assert_eq!(attrs[ATTR_TARGET_TEMP_HIGH], json!(24.0));
        assert_eq!(attrs[ATTR_HVAC_ACTION], json!("idle"));
        assert_eq!(attrs[ATTR_FAN_MODE], Value::Null);
        assert_eq!(attrs[ATTR_FAN_MODES], json!(["auto", "high"]));
        assert_eq!(attrs[ATTR_SUPPORTED_FEATURES], json!(11));
    }

    #[test]
    fn test_fahrenheit_defaults() {
        let mut snapshot = ClimateStateSnapshot::new(TemperatureUnit::Fahrenheit);
        snapshot.current_temperature = Some(70.6);

        let attrs = snapshot.state_attributes();
        assert_eq!(attrs[ATTR_UNIT_OF_MEASUREMENT], json!("°F"));
        assert_eq!(attrs[ATTR_CURRENT_TEMPERATURE], json!(71.0));
        assert_eq!(attrs[ATTR_MAX_TEMP], json!(95.0));
    }
}
