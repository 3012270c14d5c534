//! The control decision
//!
//! Given the thermostat's requested mode and setpoints and what the wrapped
//! entity is currently doing, work out the single command (if any) that
//! brings the wrapped entity in line. Everything here is synchronous and
//! free of I/O; the thermostat gathers the inputs and sends the result.

use ha_climate::consts::{ATTR_HVAC_MODES, ATTR_TEMPERATURE};
use ha_climate::HvacMode;
use ha_core::State;
use tracing::{debug, info, warn};

/// Setpoints held by the thermostat
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Setpoints {
    pub target_temp: Option<f64>,
    pub target_temp_low: Option<f64>,
    pub target_temp_high: Option<f64>,
}

impl Setpoints {
    /// Whether the setpoints `mode` runs on are all known
    pub fn ready_for(&self, mode: HvacMode) -> bool {
        match mode {
            HvacMode::HeatCool => self.target_temp_low.is_some() && self.target_temp_high.is_some(),
            HvacMode::Heat | HvacMode::Cool => self.target_temp.is_some(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub cold: f64,
    pub hot: f64,
}

/// The parts of the wrapped entity's state the decision looks at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WrappedClimate {
    /// `None` when the state is not an hvac mode (e.g. `unavailable`)
    pub hvac_mode: Option<HvacMode>,
    pub temperature: Option<f64>,
    pub hvac_modes: Vec<HvacMode>,
}

impl WrappedClimate {
    pub fn from_state(state: &State) -> Self {
        let hvac_modes = state
            .attribute::<Vec<String>>(ATTR_HVAC_MODES)
            .unwrap_or_default()
            .iter()
            .filter_map(|mode| mode.parse().ok())
            .collect();

        Self {
            hvac_mode: state.state.parse().ok(),
            temperature: state.numeric_attribute(ATTR_TEMPERATURE).and_then(Result::ok),
            hvac_modes,
        }
    }
}

/// One outbound call against the wrapped entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `climate.set_hvac_mode`
    SetHvacMode(HvacMode),
    /// `climate.set_temperature`, switching mode in the same call when set
    SetTemperature {
        temperature: f64,
        hvac_mode: Option<HvacMode>,
    },
}

/// Far enough above the low setpoint to want cooling
pub fn is_too_hot(current: f64, target_temp_low: f64, hot_tolerance: f64) -> bool {
    let too_hot = current >= target_temp_low + hot_tolerance;
    debug!(too_hot, current, target_temp_low, hot_tolerance, "Checked for cooling");
    too_hot
}

/// Far enough below the high setpoint to want heating
pub fn is_too_cold(current: f64, target_temp_high: f64, cold_tolerance: f64) -> bool {
    let too_cold = current <= target_temp_high - cold_tolerance;
    debug!(too_cold, current, target_temp_high, cold_tolerance, "Checked for heating");
    too_cold
}

/// Mode and setpoint the wrapped entity should be running
///
/// `None` means leave it alone: in `heat_cool` with the temperature inside
/// both bands, or when a needed setpoint is missing.
pub fn desired(
    hvac_mode: HvacMode,
    current: f64,
    setpoints: &Setpoints,
    tolerances: Tolerances,
) -> Option<(HvacMode, Option<f64>)> {
    match hvac_mode {
        HvacMode::HeatCool => {
            let low = setpoints.target_temp_low?;
            let high = setpoints.target_temp_high?;
            if is_too_hot(current, low, tolerances.hot) {
                info!(target_temp_high = high, "Turning on cooling mode");
                Some((HvacMode::Cool, Some(high)))
            } else if is_too_cold(current, high, tolerances.cold) {
                info!(target_temp_low = low, "Turning on heating mode");
                Some((HvacMode::Heat, Some(low)))
            } else {
                None
            }
        }
        HvacMode::Heat | HvacMode::Cool => Some((hvac_mode, Some(setpoints.target_temp?))),
        other => Some((other, None)),
    }
}

/// The command for one control pass, if any
///
/// Nothing is sent for a mode the wrapped entity does not offer, and parts
/// of the command the wrapped entity already satisfies are dropped.
pub fn decide(
    hvac_mode: HvacMode,
    current: f64,
    setpoints: &Setpoints,
    tolerances: Tolerances,
    wrapped: &WrappedClimate,
) -> Option<Command> {
    let (mode, temperature) = desired(hvac_mode, current, setpoints, tolerances)?;

    if !wrapped.hvac_modes.contains(&mode) {
        warn!(hvac_mode = %mode, available = ?wrapped.hvac_modes, "Wrapped entity does not offer mode");
        return None;
    }

    let change_mode = wrapped.hvac_mode != Some(mode);
    match temperature {
        Some(temperature) if wrapped.temperature != Some(temperature) => Some(Command::SetTemperature {
            temperature,
            hvac_mode: change_mode.then_some(mode),
        }),
        _ if change_mode => Some(Command::SetHvacMode(mode)),
        _ => None,
    }
}
