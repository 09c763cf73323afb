use std::sync::Arc;

use bulwark_common::resilience::CircuitState;
use bulwark_core::GaugeSource;
use bulwark_domain::GaugeReading;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::errors::InfraError;

/// Prometheus view of the gateway's runtime gauges and circuit states
pub struct PrometheusExporter {
    registry: Registry,
    /// Every engine gauge, labelled by its dot-delimited name
    gauges: GaugeVec,
    /// Circuit breaker state per pool key (0=closed, 1=open, 2=half-open)
    circuit_state: GaugeVec,
}

impl PrometheusExporter {
    /// Create an exporter with its own registry
    pub fn new() -> Result<Self, InfraError> {
        Self::with_registry(Registry::new_custom(Some("bulwark".to_owned()), None)?)
    }

    /// Create an exporter registering into `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, InfraError> {
        let gauges =
            GaugeVec::new(Opts::new("gateway_gauge", "Runtime gauge read from the engine"), &[
                "name",
            ])?;
        registry.register(Box::new(gauges.clone()))?;

        let circuit_state = GaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Current state of circuit breaker (0=closed, 1=open, 2=half-open)",
            ),
            &["pool_key"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self { registry, gauges, circuit_state })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_gauges(&self, readings: &[GaugeReading]) {
        for reading in readings {
            if reading.value.is_finite() {
                self.gauges.with_label_values(&[reading.name.as_str()]).set(reading.value);
            }
        }
    }

    pub fn record_circuits(&self, states: &[(String, CircuitState)]) {
        for (pool_key, state) in states {
            let value = match state {
                CircuitState::Closed => 0.0,
                CircuitState::Open => 1.0,
                CircuitState::HalfOpen => 2.0,
            };
            self.circuit_state.with_label_values(&[pool_key.as_str()]).set(value);
        }
    }

    /// Text exposition format of everything registered
    pub fn render(&self) -> Result<String, InfraError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Gauge source decorator that copies every scrape into the exporter.
///
/// Rolling gauges reset when read, so the exporter rides along with the
/// collector's scrape instead of reading the engine itself.
pub struct MirroredGaugeSource {
    inner: Arc<dyn GaugeSource>,
    exporter: Arc<PrometheusExporter>,
}

impl MirroredGaugeSource {
    pub fn new(inner: Arc<dyn GaugeSource>, exporter: Arc<PrometheusExporter>) -> Self {
        Self { inner, exporter }
    }
}

impl GaugeSource for MirroredGaugeSource {
    fn read_gauges(&self) -> Vec<GaugeReading> {
        let readings = self.inner.read_gauges();
        self.exporter.record_gauges(&readings);
        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<GaugeReading>);

    impl GaugeSource for Fixed {
        fn read_gauges(&self) -> Vec<GaugeReading> {
            self.0.clone()
        }
    }

    #[test]
    fn mirrors_scraped_gauges() {
        let exporter = Arc::new(PrometheusExporter::new().unwrap());
        let source = MirroredGaugeSource::new(
            Arc::new(Fixed(vec![
                GaugeReading::new("threadpool.api.orders.list.maxSize", 10.0),
                GaugeReading::new("latency.api.orders.list.p99", f64::NAN),
            ])),
            Arc::clone(&exporter),
        );

        assert_eq!(source.read_gauges().len(), 2);

        let text = exporter.render().unwrap();
        assert!(text.contains(r#"bulwark_gateway_gauge{name="threadpool.api.orders.list.maxSize"} 10"#));
        assert!(!text.contains("latency.api.orders.list.p99"));
    }

    #[test]
    fn encodes_circuit_states() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.record_circuits(&[
            ("orders-list".to_owned(), CircuitState::Open),
            ("billing-charge".to_owned(), CircuitState::HalfOpen),
        ]);

        let text = exporter.render().unwrap();
        assert!(text.contains(r#"bulwark_circuit_breaker_state{pool_key="orders-list"} 1"#));
        assert!(text.contains(r#"bulwark_circuit_breaker_state{pool_key="billing-charge"} 2"#));
    }
}
