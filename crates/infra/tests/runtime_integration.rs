//! Runtime wiring against a scripted downstream and a mock callback endpoint
//!
//! Run with: `cargo test -p bulwark-infra --test runtime_integration`

use std::sync::Arc;
use std::time::Duration;

use bulwark_core::execution::Downstream;
use bulwark_core::testing::{ScriptedDownstream, Step};
use bulwark_core::Submission;
use bulwark_domain::constants::{HEADER_CALLBACK_URL, HEADER_EXECUTION_MODE, HEADER_MAILBOX_ID};
use bulwark_domain::{ApiConfig, EndpointSpec, GatewayConfig, GatewayRequest, HttpMethod, ServiceConfig};
use bulwark_infra::{GatewayRuntime, InfraError, WorkerError};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> GatewayConfig {
    let service = ServiceConfig::new(EndpointSpec::Simple {
        scheme: "http".into(),
        host: "orders.local".into(),
        port: 8080,
    })
    .with_api("list", ApiConfig::new(HttpMethod::Get, "/orders"));
    let mut config = GatewayConfig::default().with_service("orders", service);
    config.metrics.scrape_interval_secs = 1;
    config.optimizer.interval_secs = 1;
    config
}

fn runtime(downstream: Arc<ScriptedDownstream>) -> GatewayRuntime {
    GatewayRuntime::builder(config())
        .downstream(downstream as Arc<dyn Downstream>)
        .with_prometheus()
        .build()
        .expect("runtime should build")
}

#[test]
fn build_requires_downstream() {
    let result = GatewayRuntime::builder(config()).build();
    assert!(matches!(result, Err(InfraError::Config(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn collector_worker_feeds_prometheus() -> anyhow::Result<()> {
    let downstream = Arc::new(ScriptedDownstream::always(Step::status(200)));
    let mut runtime = runtime(Arc::clone(&downstream));
    runtime.start()?;

    let submission = runtime.gateway().submit(GatewayRequest::new("orders", "list")).await?;
    assert!(matches!(submission, Submission::Completed(_)));

    let exporter = runtime.exporter().expect("prometheus enabled").clone();
    let mut rendered = String::new();
    for _ in 0..40 {
        rendered = exporter.render()?;
        if rendered.contains("threadpool.api.orders.list.maxSize") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(rendered.contains(r#"name="threadpool.api.orders.list.maxSize"} 10"#), "{rendered}");

    runtime.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_refused() -> anyhow::Result<()> {
    let mut runtime = runtime(Arc::new(ScriptedDownstream::always(Step::status(200))));
    runtime.start()?;

    let err = runtime.start().unwrap_err();
    assert!(matches!(err, InfraError::Worker(WorkerError::AlreadyRunning { .. })));

    runtime.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn async_result_is_posted_to_callback_url() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .and(body_partial_json(serde_json::json!({ "state": "RESPONDED" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime(Arc::new(ScriptedDownstream::always(Step::status(200))));
    let request = GatewayRequest::new("orders", "list")
        .with_header(HEADER_EXECUTION_MODE, "async")
        .with_header(HEADER_MAILBOX_ID, "M1")
        .with_header(HEADER_CALLBACK_URL, format!("{}/hooks/orders", server.uri()));

    let submission = runtime.gateway().submit(request).await?;
    let request_id = submission.request_id().expect("accepted").to_owned();

    let mut delivered = false;
    for _ in 0..50 {
        if !server.received_requests().await.unwrap_or_default().is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(delivered, "callback was not delivered");
    assert!(runtime.mailbox_store().len() == 1);
    assert_eq!(
        runtime.gateway().response(&request_id, Some("M1")).await?.map(|r| r.status),
        Some(200)
    );
    Ok(())
}
