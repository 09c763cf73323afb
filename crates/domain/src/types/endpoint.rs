//! Resolved downstream addresses

use serde::{Deserialize, Serialize};

/// Network address of a downstream service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { scheme: scheme.into(), host: host.into(), port }
    }

    /// `scheme://host:port` without a trailing slash
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Join an API path onto the base URL
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

/// Outcome of resolving an endpoint spec
///
/// Discovery-backed endpoints may have no registered instance yet; that is a
/// normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointResolution {
    Ready(Endpoint),
    NotYetAvailable,
}

impl EndpointResolution {
    pub fn ready(self) -> Option<Endpoint> {
        match self {
            Self::Ready(endpoint) => Some(endpoint),
            Self::NotYetAvailable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_normalises_leading_slash() {
        let endpoint = Endpoint::new("http", "orders.internal", 8080);
        assert_eq!(endpoint.url_for("/v1/orders"), "http://orders.internal:8080/v1/orders");
        assert_eq!(endpoint.url_for("v1/orders"), "http://orders.internal:8080/v1/orders");
    }
}
