mod analyzer;
mod catalog;
mod cluster;
mod config;
mod controller;
mod engine;
mod image;
mod metrics;
mod models;
mod recheck;
mod registry;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "heimdall=info,kube=info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Heimdall - image freshness and CVE watchdog");

    let config = config::HeimdallConfig::from_env();

    let metrics_handle = metrics::start_metrics_server(&config.metrics_addr).await?;
    let controller_handle = controller::start_controllers(config).await?;

    info!("Heimdall is running");

    tokio::select! {
        _ = metrics_handle => info!("Metrics server stopped"),
        _ = controller_handle => info!("Controllers stopped"),
    }

    Ok(())
}
