//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, route, success
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//!
//! # Design Decisions
//! - The route label is the key of the matched route, never the request
//!   path, so label cardinality is bounded by the route table

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::http::middleware::{RequestRecord, StatsSink};

const UNMATCHED: &str = "unmatched";

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Stats sink that feeds the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusStatsSink;

impl StatsSink for PrometheusStatsSink {
    fn track_request(&self, record: &RequestRecord) {
        let method = record.method.to_string();
        let route = route_label(record).to_string();
        let success = if record.success { "true" } else { "false" };

        metrics::counter!(
            "gateway_requests_total",
            "method" => method.clone(),
            "route" => route.clone(),
            "success" => success
        )
        .increment(1);

        metrics::histogram!(
            "gateway_request_duration_seconds",
            "method" => method,
            "route" => route,
            "success" => success
        )
        .record(record.duration.as_secs_f64());
    }
}

fn route_label(record: &RequestRecord) -> &str {
    record.route.as_deref().unwrap_or(UNMATCHED)
}
