//! Attribute keys, service names and defaults of the climate domain

use ha_hass::TemperatureUnit;

pub const DOMAIN: &str = "climate";

pub const ATTR_CURRENT_TEMPERATURE: &str = "current_temperature";
pub const ATTR_TEMPERATURE: &str = "temperature";
pub const ATTR_TARGET_TEMP_HIGH: &str = "target_temp_high";
pub const ATTR_TARGET_TEMP_LOW: &str = "target_temp_low";
pub const ATTR_TARGET_TEMP_STEP: &str = "target_temp_step";
pub const ATTR_HVAC_MODE: &str = "hvac_mode";
pub const ATTR_HVAC_MODES: &str = "hvac_modes";
pub const ATTR_HVAC_ACTION: &str = "hvac_action";
pub const ATTR_FAN_MODE: &str = "fan_mode";
pub const ATTR_FAN_MODES: &str = "fan_modes";
pub const ATTR_SWING_MODE: &str = "swing_mode";
pub const ATTR_SWING_MODES: &str = "swing_modes";
pub const ATTR_PRESET_MODE: &str = "preset_mode";
pub const ATTR_PRESET_MODES: &str = "preset_modes";
pub const ATTR_MIN_TEMP: &str = "min_temp";
pub const ATTR_MAX_TEMP: &str = "max_temp";
pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
pub const ATTR_SUPPORTED_FEATURES: &str = "supported_features";
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";

pub const SERVICE_SET_HVAC_MODE: &str = "set_hvac_mode";
pub const SERVICE_SET_TEMPERATURE: &str = "set_temperature";
pub const SERVICE_SET_FAN_MODE: &str = "set_fan_mode";
pub const SERVICE_SET_SWING_MODE: &str = "set_swing_mode";
pub const SERVICE_SET_PRESET_MODE: &str = "set_preset_mode";

pub const PRECISION_WHOLE: f64 = 1.0;
pub const PRECISION_HALVES: f64 = 0.5;
pub const PRECISION_TENTHS: f64 = 0.1;

/// Minimum settable temperature in the given unit (7 °C)
pub fn default_min_temp(unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => 7.0,
        TemperatureUnit::Fahrenheit => 44.6,
    }
}

/// Maximum settable temperature in the given unit (35 °C)
pub fn default_max_temp(unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => 35.0,
        TemperatureUnit::Fahrenheit => 95.0,
    }
}

/// Display precision when the entity does not advertise a step
pub fn default_precision(unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => PRECISION_TENTHS,
        TemperatureUnit::Fahrenheit => PRECISION_WHOLE,
    }
}
