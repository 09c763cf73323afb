use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::{CallbackDelivery, CallbackError, CallbackTransport};
use bulwark_domain::{CallbackTarget, HttpMethod};
use reqwest::{Client as ReqwestClient, Method};
use tracing::debug;

use crate::errors::InfraError;

/// Posts callback deliveries as JSON with reqwest.
///
/// One call is one attempt; retries and backoff belong to the
/// `CallbackDispatcher` driving this transport.
#[derive(Clone)]
pub struct HttpCallbackTransport {
    client: ReqwestClient,
    default_timeout: Duration,
}

impl HttpCallbackTransport {
    /// Start building a new transport.
    pub fn builder() -> HttpCallbackTransportBuilder {
        HttpCallbackTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, InfraError> {
        Self::builder().build()
    }

    fn timeout_for(&self, target: &CallbackTarget) -> Duration {
        target.timeout.unwrap_or(self.default_timeout)
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn deliver(
        &self,
        target: &CallbackTarget,
        delivery: &CallbackDelivery,
    ) -> Result<(), CallbackError> {
        let timeout = self.timeout_for(target);
        let method = to_reqwest_method(target.method);
        debug!(request_id = %delivery.request_id, %method, url = %target.url, "sending callback");

        let response = self
            .client
            .request(method, &target.url)
            .timeout(timeout)
            .json(delivery)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CallbackError::Timeout(timeout)
                } else {
                    CallbackError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        debug!(request_id = %delivery.request_id, %status, "callback answered");
        if status.is_success() {
            Ok(())
        } else {
            Err(CallbackError::Rejected { status: status.as_u16() })
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Builder for [`HttpCallbackTransport`].
#[derive(Debug)]
pub struct HttpCallbackTransportBuilder {
    default_timeout: Duration,
    user_agent: Option<String>,
}

impl Default for HttpCallbackTransportBuilder {
    fn default() -> Self {
        Self { default_timeout: Duration::from_secs(5), user_agent: None }
    }
}

impl HttpCallbackTransportBuilder {
    /// Per-attempt timeout when the target carries none
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpCallbackTransport, InfraError> {
        let mut builder = ReqwestClient::builder().no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        Ok(HttpCallbackTransport { client: builder.build()?, default_timeout: self.default_timeout })
    }
}

#[cfg(test)]
mod tests {
    use bulwark_domain::{GatewayResponse, RequestState};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn delivery() -> CallbackDelivery {
        CallbackDelivery {
            request_id: "r1".into(),
            state: RequestState::Responded,
            response: GatewayResponse::new(200, "ok"),
        }
    }

    fn target(server: &MockServer, timeout: Option<Duration>) -> CallbackTarget {
        CallbackTarget {
            url: format!("{}/hooks/orders", server.uri()),
            method: HttpMethod::Post,
            timeout,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn posts_delivery_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/orders"))
            .and(body_partial_json(serde_json::json!({ "requestId": "r1" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpCallbackTransport::new().unwrap();
        transport.deliver(&target(&server, None), &delivery()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = HttpCallbackTransport::new().unwrap();
        let err = transport.deliver(&target(&server, None), &delivery()).await.unwrap_err();
        assert_eq!(err, CallbackError::Rejected { status: 500 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_endpoint_times_out_with_target_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = HttpCallbackTransport::new().unwrap();
        let timeout = Duration::from_millis(100);
        let err = transport.deliver(&target(&server, Some(timeout)), &delivery()).await.unwrap_err();
        assert_eq!(err, CallbackError::Timeout(timeout));
    }
}
