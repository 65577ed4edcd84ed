//! Prometheus metrics for the prediction client.
//!
//! Metrics are recorded through the `metrics` facade; nothing is exported
//! unless a recorder is installed (see [`install_prometheus`]).

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const PREDICTIONS_TOTAL: &str = "aquila_predictions_total";
    pub const PREDICTIONS_FAILED_TOTAL: &str = "aquila_predictions_failed_total";
    pub const PREDICTION_RETRIES_TOTAL: &str = "aquila_prediction_retries_total";
    pub const RPC_DURATION_SECONDS: &str = "aquila_rpc_duration_seconds";
    pub const REQUESTS_IN_FLIGHT: &str = "aquila_requests_in_flight";
    pub const RECONNECTS_TOTAL: &str = "aquila_reconnects_total";
    pub const DEMOGRAPHIC_LOOKUP_FAILURES_TOTAL: &str = "aquila_demographic_lookup_failures_total";
}

/// Register all metrics with their descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::PREDICTIONS_TOTAL,
        "Total number of logical predictions requested"
    );
    describe_counter!(
        names::PREDICTIONS_FAILED_TOTAL,
        "Total number of predictions that failed after all attempts"
    );
    describe_counter!(
        names::PREDICTION_RETRIES_TOTAL,
        "Total number of prediction attempts that were retried"
    );
    describe_histogram!(
        names::RPC_DURATION_SECONDS,
        "Duration of Regress RPCs in seconds"
    );
    describe_gauge!(
        names::REQUESTS_IN_FLIGHT,
        "Number of requests currently outstanding on the connection"
    );
    describe_counter!(
        names::RECONNECTS_TOTAL,
        "Total number of channel reconnects after connectivity failures"
    );
    describe_counter!(
        names::DEMOGRAPHIC_LOOKUP_FAILURES_TOTAL,
        "Total number of responses returned without a demographic score"
    );
}

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}
