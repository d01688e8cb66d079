use anyhow::Result;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Outbound call counters, shared by the registry and catalogue clients.
    pub static ref REGISTRY_CALLS_TOTAL: IntCounter = IntCounter::new(
        "heimdall_registry_calls_total",
        "Total number of outbound registry/catalogue calls"
    ).unwrap();

    pub static ref REGISTRY_CALLS_SUCCESS: IntCounter = IntCounter::new(
        "heimdall_registry_calls_success",
        "Total number of successful outbound registry/catalogue calls"
    ).unwrap();

    pub static ref REGISTRY_CALLS_FAILURE: IntCounter = IntCounter::new(
        "heimdall_registry_calls_failure",
        "Total number of failed outbound registry/catalogue calls"
    ).unwrap();

    // Reconciliation metrics.
    pub static ref RECONCILE_TOTAL: IntCounter = IntCounter::new(
        "heimdall_reconcile_total",
        "Total number of reconcile events processed"
    ).unwrap();

    pub static ref RECONCILE_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "heimdall_reconcile_errors_total",
        "Total number of reconcile events that ended in an error"
    ).unwrap();

    pub static ref RECONCILE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "heimdall_reconcile_duration_seconds",
            "Time spent reconciling one workload"
        ).buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0])
    ).unwrap();

    // Per-kind monitored-workload gauge.
    pub static ref WORKLOADS_MONITORED: IntGaugeVec = IntGaugeVec::new(
        Opts::new(
            "heimdall_workloads_monitored",
            "Number of workloads currently carrying the heimdall.monitored label"
        ),
        &["kind"],
    ).unwrap();

    pub static ref RESOLVABLE_CVES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "heimdall_resolvable_cves_total",
            "Total resolvable CVEs observed across all checked images, by severity"
        ),
        &["severity"],
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(REGISTRY_CALLS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(REGISTRY_CALLS_SUCCESS.clone())).ok();
    REGISTRY.register(Box::new(REGISTRY_CALLS_FAILURE.clone())).ok();
    REGISTRY.register(Box::new(RECONCILE_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(RECONCILE_ERRORS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(RECONCILE_DURATION.clone())).ok();
    REGISTRY.register(Box::new(WORKLOADS_MONITORED.clone())).ok();
    REGISTRY.register(Box::new(RESOLVABLE_CVES_TOTAL.clone())).ok();

    info!("Metrics registered");
}

pub async fn start_metrics_server(addr: &str) -> Result<JoinHandle<()>> {
    register_metrics();

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());

    let addr = addr.to_string();
    info!("Starting metrics server on {}", addr);

    let handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind metrics server");

        axum::serve(listener, app)
            .await
            .expect("Metrics server failed");
    });

    Ok(handle)
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buffer,
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_metrics_twice_does_not_panic() {
        register_metrics();
        register_metrics();
    }
}
