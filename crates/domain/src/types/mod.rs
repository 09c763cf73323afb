//! Domain types shared by the engine and its adapters

pub mod endpoint;
pub mod mailbox;
pub mod metrics;
pub mod request;

pub use endpoint::{Endpoint, EndpointResolution};
pub use mailbox::{MailboxEntry, RequestState};
pub use metrics::{GaugeReading, MetricKey, MetricKind, OptimizerMetricSample};
pub use request::{
    CallbackTarget, ExecutionMode, GatewayRequest, GatewayResponse, HttpMethod, RequestMetadata,
};
