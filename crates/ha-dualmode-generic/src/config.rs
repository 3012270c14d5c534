//! Platform configuration
//!
//! Thermostats are configured as `climate:` platform entries:
//!
//! ```yaml
//! climate:
//!   - platform: dualmode_generic
//!     name: Living Room
//!     climate_entity_id: climate.heat_pump
//!     sensor_entity_id: sensor.living_room_temperature
//!     min_cycle_duration: "00:05:00"
//!     target_temp_low: 19
//!     target_temp_high: 24
//!     initial_hvac_mode: heat_cool
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ha_climate::HvacMode;
use ha_core::EntityId;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, error};

/// Platform names accepted under `climate:`
pub const PLATFORMS: [&str; 2] = [crate::DOMAIN, "proxy_climate"];

pub const DEFAULT_NAME: &str = "Generic Thermostat";
pub const DEFAULT_TOLERANCE: f64 = 0.3;

/// Modes allowed for `initial_hvac_mode`
pub const INITIAL_HVAC_MODES: [HvacMode; 6] = [
    HvacMode::Cool,
    HvacMode::Heat,
    HvacMode::FanOnly,
    HvacMode::Dry,
    HvacMode::Off,
    HvacMode::HeatCool,
];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid thermostat '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// One `dualmode_generic` platform entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThermostatConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// The heat-or-cool climate entity being driven
    pub climate_entity_id: EntityId,

    /// Separate temperature sensor; replaces the wrapped entity's reading
    #[serde(default)]
    pub sensor_entity_id: Option<EntityId>,

    /// Minimum time the wrapped entity stays in a mode before it is switched
    #[serde(default, deserialize_with = "time_period::deserialize")]
    pub min_cycle_duration: Option<Duration>,

    #[serde(default = "default_tolerance")]
    pub cold_tolerance: f64,

    #[serde(default = "default_tolerance")]
    pub hot_tolerance: f64,

    #[serde(default)]
    pub target_temp: Option<f64>,

    #[serde(default)]
    pub target_temp_high: Option<f64>,

    #[serde(default)]
    pub target_temp_low: Option<f64>,

    #[serde(default)]
    pub initial_hvac_mode: Option<HvacMode>,

    #[serde(default)]
    pub unique_id: Option<String>,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

impl ThermostatConfig {
    /// Minimal configuration wrapping `climate_entity_id`
    pub fn new(climate_entity_id: EntityId) -> Self {
        Self {
            name: default_name(),
            climate_entity_id,
            sensor_entity_id: None,
            min_cycle_duration: None,
            cold_tolerance: DEFAULT_TOLERANCE,
            hot_tolerance: DEFAULT_TOLERANCE,
            target_temp: None,
            target_temp_high: None,
            target_temp_low: None,
            initial_hvac_mode: None,
            unique_id: None,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.cold_tolerance < 0.0 || self.hot_tolerance < 0.0 {
            return Err(invalid(format!(
                "tolerances must not be negative (cold {}, hot {})",
                self.cold_tolerance, self.hot_tolerance
            )));
        }
        if let (Some(low), Some(high)) = (self.target_temp_low, self.target_temp_high) {
            if low > high {
                return Err(invalid(format!(
                    "target_temp_low {} exceeds target_temp_high {}",
                    low, high
                )));
            }
        }
        if self.min_cycle_duration == Some(Duration::ZERO) {
            return Err(invalid("min_cycle_duration must be positive".to_string()));
        }
        if let Some(mode) = self.initial_hvac_mode {
            if !INITIAL_HVAC_MODES.contains(&mode) {
                return Err(invalid(format!("initial_hvac_mode {} is not allowed", mode)));
            }
        }
        if self.climate_entity_id.domain() != ha_climate::consts::DOMAIN {
            return Err(invalid(format!(
                "climate_entity_id {} is not a climate entity",
                self.climate_entity_id
            )));
        }
        Ok(())
    }
}

/// Thermostat entries of `configuration.yaml` text
///
/// Entries for other platforms are ignored. An entry that fails to parse or
/// validate is logged and skipped so the remaining thermostats still load.
pub fn parse_platform_configs(yaml: &str) -> ConfigResult<Vec<ThermostatConfig>> {
    let root: serde_yaml::Value = serde_yaml::from_str(yaml)?;

    let entries = match root.get("climate") {
        Some(serde_yaml::Value::Sequence(entries)) => entries.clone(),
        Some(entry @ serde_yaml::Value::Mapping(_)) => vec![entry.clone()],
        _ => Vec::new(),
    };

    let mut configs = Vec::new();
    for entry in entries {
        let platform = entry.get("platform").and_then(|p| p.as_str());
        if !platform.is_some_and(|p| PLATFORMS.contains(&p)) {
            continue;
        }

        let config = match serde_yaml::from_value::<ThermostatConfig>(entry) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Invalid thermostat configuration");
                continue;
            }
        };
        if let Err(e) = config.validate() {
            error!(error = %e, "Invalid thermostat configuration");
            continue;
        }

        debug!(name = %config.name, climate_entity_id = %config.climate_entity_id, "Loaded thermostat configuration");
        configs.push(config);
    }

    Ok(configs)
}

/// Read thermostat entries from a configuration file
pub async fn load_platform_configs(path: impl AsRef<Path>) -> ConfigResult<Vec<ThermostatConfig>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_platform_configs(&content)
}

/// Time periods: seconds, `HH:MM[:SS]`, or a `{days, hours, minutes, seconds}` map
pub(crate) mod time_period {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimePeriod {
        Seconds(f64),
        Text(String),
        Parts {
            #[serde(default)]
            days: f64,
            #[serde(default)]
            hours: f64,
            #[serde(default)]
            minutes: f64,
            #[serde(default)]
            seconds: f64,
        },
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let period: Option<TimePeriod> = Option::deserialize(deserializer)?;
        let seconds = match period {
            None => return Ok(None),
            Some(TimePeriod::Seconds(secs)) => secs,
            Some(TimePeriod::Text(s)) => parse_text(&s).map_err(serde::de::Error::custom)?,
            Some(TimePeriod::Parts {
                days,
                hours,
                minutes,
                seconds,
            }) => days * 86_400.0 + hours * 3_600.0 + minutes * 60.0 + seconds,
        };

        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(serde::de::Error::custom(format!(
                "time period must be positive, got {} seconds",
                seconds
            )));
        }
        Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }

    /// `SS`, `HH:MM` or `HH:MM:SS`
    pub(crate) fn parse_text(s: &str) -> Result<f64, String> {
        let parse = |part: &str, what: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid {} in time period '{}'", what, s))
        };

        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [secs] => parse(secs, "seconds"),
            [hours, mins] => Ok(parse(hours, "hours")? * 3_600.0 + parse(mins, "minutes")? * 60.0),
            [hours, mins, secs] => Ok(parse(hours, "hours")? * 3_600.0
                + parse(mins, "minutes")? * 60.0
                + parse(secs, "seconds")?),
            _ => Err(format!("invalid time period '{}'", s)),
        }
    }
}
