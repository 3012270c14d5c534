use async_trait::async_trait;
use ha_core::{Context, EntityId};
use ha_service_registry::ServiceError;
use serde::Deserialize;
use thiserror::Error;

use crate::HvacMode;

/// Errors raised by climate entities
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClimateError {
    #[error("hvac mode {mode} is not one of {available:?}")]
    UnsupportedHvacMode {
        mode: HvacMode,
        available: Vec<HvacMode>,
    },

    #[error("{kind} '{value}' is not one of {available:?}")]
    UnsupportedMode {
        kind: &'static str,
        value: String,
        available: Vec<String>,
    },

    #[error("target_temp_low {low} must not exceed target_temp_high {high}")]
    InvalidTemperatureRange { low: f64, high: f64 },

    #[error("entity does not support {0}")]
    NotSupported(&'static str),

    #[error("wrapped entity {0} has no state")]
    Unavailable(EntityId),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub type ClimateResult<T> = Result<T, ClimateError>;

impl From<ClimateError> for ServiceError {
    fn from(err: ClimateError) -> Self {
        match err {
            ClimateError::Service(inner) => inner,
            ClimateError::UnsupportedHvacMode { .. }
            | ClimateError::UnsupportedMode { .. }
            | ClimateError::InvalidTemperatureRange { .. }
            | ClimateError::NotSupported(_) => ServiceError::InvalidData(err.to_string()),
            ClimateError::Unavailable(_) => ServiceError::CallFailed(err.to_string()),
        }
    }
}

/// Data of a `climate.set_temperature` call
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetTemperature {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub target_temp_low: Option<f64>,
    #[serde(default)]
    pub target_temp_high: Option<f64>,
    #[serde(default)]
    pub hvac_mode: Option<HvacMode>,
}

impl SetTemperature {
    /// Single setpoint
    pub fn temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }

    /// Pull the request out of service data, requiring at least one setpoint
    pub fn from_service_data(data: &serde_json::Value) -> Result<Self, ServiceError> {
        let request: SetTemperature = serde_json::from_value(data.clone())
            .map_err(|e| ServiceError::InvalidData(e.to_string()))?;

        if request.temperature.is_none()
            && request.target_temp_low.is_none()
            && request.target_temp_high.is_none()
        {
            return Err(ServiceError::InvalidData(
                "one of temperature, target_temp_low or target_temp_high is required".to_string(),
            ));
        }
        if let (Some(low), Some(high)) = (request.target_temp_low, request.target_temp_high) {
            if low > high {
                return Err(ClimateError::InvalidTemperatureRange { low, high }.into());
            }
        }
        Ok(request)
    }
}

/// A climate entity that can be driven through the `climate.*` services
///
/// Fan, swing and preset support is optional; the defaults reject the call.
#[async_trait]
pub trait ClimateEntity: Send + Sync {
    fn entity_id(&self) -> &EntityId;

    async fn set_hvac_mode(&self, hvac_mode: HvacMode, context: &Context) -> ClimateResult<()>;

    async fn set_temperature(&self, request: SetTemperature, context: &Context)
        -> ClimateResult<()>;

    async fn set_fan_mode(&self, _fan_mode: &str, _context: &Context) -> ClimateResult<()> {
        Err(ClimateError::NotSupported("fan_mode"))
    }

    async fn set_swing_mode(&self, _swing_mode: &str, _context: &Context) -> ClimateResult<()> {
        Err(ClimateError::NotSupported("swing_mode"))
    }

    async fn set_preset_mode(&self, _preset_mode: &str, _context: &Context) -> ClimateResult<()> {
        Err(ClimateError::NotSupported("preset_mode"))
    }
}
