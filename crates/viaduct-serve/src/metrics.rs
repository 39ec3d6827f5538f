//! Prometheus metrics for the dispatch path, kept in a dedicated registry
//! so the debug server can expose exactly the gateway's own series.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "viaduct";
const SUBSYSTEM: &str = "endpoint";

// Bucket ladder tuned for gateway hops: sub-millisecond cache hits up to
// tens of seconds for slow upstreams.
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 15.0,
    20.0, 30.0,
];

/// Label values used when a request misses every endpoint version and no
/// backend service is known.
pub const LABEL_UNKNOWN_PROTO: &str = "unknown";

pub struct EndpointMetrics {
    registry: Registry,
    pub access_counter: CounterVec,
    pub error_counter: CounterVec,
    pub route_duration: HistogramVec,
}

impl EndpointMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let access_counter = CounterVec::new(
            Opts::new("access_total", "Number of endpoint accesses")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["proto", "interface", "method"],
        )?;
        let error_counter = CounterVec::new(
            Opts::new("error_total", "Number of endpoint access errors")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &["proto", "interface", "method", "error_code"],
        )?;
        let route_duration = HistogramVec::new(
            HistogramOpts::new("route_duration", "Time spent processing an endpoint")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM)
                .buckets(DURATION_BUCKETS.to_vec()),
            &["component_type", "type_id"],
        )?;
        registry.register(Box::new(access_counter.clone()))?;
        registry.register(Box::new(error_counter.clone()))?;
        registry.register(Box::new(route_duration.clone()))?;
        Ok(Self {
            registry,
            access_counter,
            error_counter,
            route_duration,
        })
    }

    pub fn record_access(&self, proto: &str, interface: &str, method: &str) {
        self.access_counter
            .with_label_values(&[proto, interface, method])
            .inc();
    }

    pub fn record_error(&self, proto: &str, interface: &str, method: &str, error_code: &str) {
        self.error_counter
            .with_label_values(&[proto, interface, method, error_code])
            .inc();
    }

    /// Counter pair for requests that matched a route but no endpoint
    /// version; the backend labels are unknowable, so the route itself
    /// stands in.
    pub fn record_route_not_found(&self, http_method: &str, pattern: &str) {
        self.record_access(LABEL_UNKNOWN_PROTO, pattern, http_method);
        self.record_error(
            LABEL_UNKNOWN_PROTO,
            pattern,
            http_method,
            viaduct_errors::codes::REQUEST_NOT_FOUND,
        );
    }

    /// Prometheus text exposition of this registry.
    pub fn gather_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(%err, "prometheus encode failed");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = EndpointMetrics::new().unwrap();
        metrics.record_access("dubbo", "com.acme.OrderService", "getOrder");
        metrics.record_error("dubbo", "com.acme.OrderService", "getOrder", "REQUEST_NOT_FOUND");
        metrics
            .route_duration
            .with_label_values(&["Transporter", "dubbo"])
            .observe(0.004);
        let text = metrics.gather_text();
        assert!(text.contains("viaduct_endpoint_access_total"));
        assert!(text.contains("viaduct_endpoint_error_total"));
        assert!(text.contains("viaduct_endpoint_route_duration_bucket"));
    }
}
