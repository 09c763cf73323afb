//! Port interfaces for downstream execution
//!
//! The network transport and service discovery live outside the engine.

use async_trait::async_trait;
use bulwark_domain::{Endpoint, EndpointResolution, EndpointSpec, GatewayResponse, TransportError};

use super::command::Command;

/// Performs one downstream call. Retries, deadlines and isolation are applied
/// around it by the engine.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Send the command's request to `endpoint`.
    ///
    /// Any status code is a successful transport result; only failures to
    /// obtain a response are errors.
    async fn call(
        &self,
        endpoint: &Endpoint,
        command: &Command,
    ) -> Result<GatewayResponse, TransportError>;
}

/// Read-only view of a service registry
pub trait DiscoveryResolver: Send + Sync {
    /// Current address for `service_id`, if any instance is registered
    fn lookup(&self, service_id: &str) -> Option<Endpoint>;
}

/// Resolver for deployments without discovery; nothing is ever available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

impl DiscoveryResolver for NoDiscovery {
    fn lookup(&self, _service_id: &str) -> Option<Endpoint> {
        None
    }
}

/// Turn an endpoint spec into an address without failing.
pub fn resolve_endpoint(spec: &EndpointSpec, discovery: &dyn DiscoveryResolver) -> EndpointResolution {
    match spec {
        EndpointSpec::Simple { scheme, host, port } => {
            EndpointResolution::Ready(Endpoint::new(scheme.clone(), host.clone(), *port))
        }
        EndpointSpec::Discovery { service_id } => match discovery.lookup(service_id) {
            Some(endpoint) => EndpointResolution::Ready(endpoint),
            None => EndpointResolution::NotYetAvailable,
        },
    }
}
