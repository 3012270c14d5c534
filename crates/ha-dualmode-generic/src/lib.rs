//! Dual-mode generic thermostat
//!
//! A climate platform that layers `heat_cool` over a climate entity able to
//! run only one of `heat` or `cool` at a time, such as a heat pump or a
//! reversible AC. The virtual thermostat keeps a low and a high setpoint,
//! watches the current temperature (from the wrapped entity or a separate
//! sensor) and switches the wrapped entity between heating and cooling with
//! a tolerance band either side.
//!
//! ```yaml
//! climate:
//!   - platform: dualmode_generic
//!     climate_entity_id: climate.heat_pump
//!     initial_hvac_mode: heat_cool
//! ```

mod config;
pub mod control;
mod platform;
mod thermostat;

pub use config::{
    load_platform_configs, parse_platform_configs, ConfigError, ConfigResult, ThermostatConfig,
    DEFAULT_NAME, DEFAULT_TOLERANCE, INITIAL_HVAC_MODES, PLATFORMS,
};
pub use platform::{DualModePlatform, PlatformError, SERVICE_RELOAD};
pub use thermostat::{DualModeThermostat, SUPPORT_FLAGS};

/// Integration domain; also the `platform:` name
pub const DOMAIN: &str = "dualmode_generic";
