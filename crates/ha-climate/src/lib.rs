//! Climate domain
//!
//! Shared vocabulary for climate entities (HVAC modes and actions, feature
//! flags, attribute and service names), the `ClimateEntity` trait every
//! climate platform implements, and the `ClimateComponent` that owns the
//! `climate.*` services and routes each call to the targeted entities.

pub mod attributes;
mod component;
pub mod consts;
mod entity;
mod feature;
mod hvac;

pub use attributes::{round_to_precision, ClimateStateSnapshot};
pub use component::ClimateComponent;
pub use entity::{ClimateEntity, ClimateError, ClimateResult, SetTemperature};
pub use feature::ClimateEntityFeature;
pub use hvac::{HvacAction, HvacMode, ParseHvacModeError};
