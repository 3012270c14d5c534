//! Service call type for invoking services

use crate::{Context, EntityId, ATTR_ENTITY_ID};
use serde::{Deserialize, Serialize};

/// A call to a service such as `climate.set_temperature`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// The domain the service belongs to (e.g. "climate")
    pub domain: String,

    /// The service name (e.g. "set_hvac_mode")
    pub service: String,

    /// Data passed to the service
    pub service_data: serde_json::Value,

    /// Context tracking who initiated this call
    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// Full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Get a typed value from service_data
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Targeted entity IDs; accepts a single string or a list
    ///
    /// Strings that are not valid entity IDs are dropped.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let parse = |v: &serde_json::Value| v.as_str().and_then(|s| s.parse().ok());
        match self.service_data.get(ATTR_ENTITY_ID) {
            Some(serde_json::Value::Array(arr)) => arr.iter().filter_map(parse).collect(),
            Some(v) => parse(v).into_iter().collect(),
            None => Vec::new(),
        }
    }
}
