//! Service registry with async handlers
//!
//! Services are how entities are controlled: the thermostat receives
//! `climate.set_temperature` through here and issues the same kind of call
//! against the entity it wraps.

use dashmap::DashMap;
use ha_core::{Context, ServiceCall};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("service does not support responses")]
    ResponseNotSupported,
}

/// Whether a service can return a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportsResponse {
    #[default]
    None,
    Optional,
    Only,
}

/// Information about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    /// Human-readable name
    pub name: Option<String>,
    pub description: Option<String>,
    /// Field descriptions, in the host's services.yaml shape
    pub fields: Option<serde_json::Value>,
    /// Target selector (e.g. `{"entity": {"domain": "climate"}}`)
    pub target: Option<serde_json::Value>,
    pub supports_response: SupportsResponse,
}

impl ServiceDescription {
    /// A bare description with no metadata
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            name: None,
            description: None,
            fields: None,
            target: None,
            supports_response: SupportsResponse::None,
        }
    }
}

struct RegisteredService {
    handler: ServiceHandler,
    description: ServiceDescription,
}

fn key(domain: &str, service: &str) -> String {
    format!("{}.{}", domain, service)
}

/// The service registry manages all registered services
pub struct ServiceRegistry {
    /// Services indexed by "domain.service" key
    services: DashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a service without metadata
    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        self.register_with_description(ServiceDescription::new(domain, service), handler);
    }

    /// Register a service with full description
    ///
    /// Registering the same `domain.service` again replaces the handler.
    #[instrument(skip(self, handler), fields(service = %key(&description.domain, &description.service)))]
    pub fn register_with_description<F, Fut>(&self, description: ServiceDescription, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        debug!("Registering service");

        let handler: ServiceHandler = Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        self.services.insert(
            key(&description.domain, &description.service),
            RegisteredService {
                handler,
                description,
            },
        );
    }

    /// Call a service and wait for its handler to finish
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
        return_response: bool,
    ) -> ServiceResult {
        let (handler, supports_response) = {
            let registered = self.services.get(&key(domain, service)).ok_or_else(|| {
                warn!("Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;
            (
                registered.handler.clone(),
                registered.description.supports_response,
            )
        };
        // The map guard is released before the handler runs; handlers may call
        // other services.

        if return_response && supports_response == SupportsResponse::None {
            return Err(ServiceError::ResponseNotSupported);
        }

        debug!("Calling service");
        let result = handler(ServiceCall::new(domain, service, service_data, context)).await?;

        Ok(if return_response { result } else { None })
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&key(domain, service))
    }

    /// All services of a domain, sorted by name
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        let mut services: Vec<_> = self
            .services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));
        services
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self.services.remove(&key(domain, service)).is_some();
        if removed {
            debug!("Unregistered service");
        }
        removed
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = ServiceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        registry.register("climate", "set_hvac_mode", move |call: ServiceCall| {
            let counter = counter.clone();
            async move {
                assert_eq!(call.get::<String>("hvac_mode").as_deref(), Some("heat"));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        });

        let result = registry
            .call(
                "climate",
                "set_hvac_mode",
                json!({"entity_id": "climate.heat_pump", "hvac_mode": "heat"}),
                Context::new(),
                false,
            )
            .await;

        assert_eq!(result, Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_service_not_found() {
        let registry = ServiceRegistry::new();
        let result = registry
            .call("climate", "set_humidity", json!({}), Context::new(), false)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_response_support() {
        let registry = ServiceRegistry::new();
        registry.register("climate", "turn_on", |_: ServiceCall| async { Ok(Some(json!(1))) });

        let result = registry
            .call("climate", "turn_on", json!({}), Context::new(), true)
            .await;
        assert_eq!(result, Err(ServiceError::ResponseNotSupported));

        let mut description = ServiceDescription::new("test", "echo");
        description.supports_response = SupportsResponse::Optional;
        registry.register_with_description(description, |call: ServiceCall| async move {
            Ok(Some(call.service_data))
        });

        let echoed = registry
            .call("test", "echo", json!({"n": 1}), Context::new(), true)
            .await;
        assert_eq!(echoed, Ok(Some(json!({"n": 1}))));

        let ignored = registry
            .call("test", "echo", json!({"n": 1}), Context::new(), false)
            .await;
        assert_eq!(ignored, Ok(None));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let registry = ServiceRegistry::new();
        registry.register("climate", "set_temperature", |_: ServiceCall| async {
            Err(ServiceError::InvalidData("temperature missing".to_string()))
        });

        let result = registry
            .call("climate", "set_temperature", json!({}), Context::new(), false)
            .await;
        assert_eq!(
            result,
            Err(ServiceError::InvalidData("temperature missing".to_string()))
        );
    }

    #[test]
    fn test_domain_services_and_unregister() {
        let registry = ServiceRegistry::new();
        for service in ["set_temperature", "set_fan_mode", "set_hvac_mode"] {
            registry.register("climate", service, |_: ServiceCall| async { Ok(None) });
        }
        registry.register("dualmode_generic", "reload", |_: ServiceCall| async { Ok(None) });

        let names: Vec<String> = registry
            .domain_services("climate")
            .into_iter()
            .map(|d| d.service)
            .collect();
        assert_eq!(names, vec!["set_fan_mode", "set_hvac_mode", "set_temperature"]);

        assert!(registry.unregister("climate", "set_fan_mode"));
        assert!(!registry.unregister("climate", "set_fan_mode"));
        assert!(!registry.has_service("climate", "set_fan_mode"));
        assert_eq!(registry.service_count(), 3);
    }
}
