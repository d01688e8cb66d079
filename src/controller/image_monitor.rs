//! Labeller trigger: an `ImageMonitor` custom resource places the
//! `heimdall.monitored` label on every deployment-like object in a
//! namespace, honouring an exclusion regex, and removes the label plus the
//! Heimdall annotations on its own deletion via a finalizer. Bookkeeping
//! alongside the kind adapters, not part of the core engine.

use crate::controller::adapter::{DeploymentAdapter, DeploymentConfigAdapter, StatefulSetAdapter, WorkloadAdapter};
use crate::metrics::{RECONCILE_ERRORS_TOTAL, WORKLOADS_MONITORED};
use crate::models::monitor::{FINALIZER, ImageMonitor};
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube::runtime::{Controller, watcher::Config};
use kube::{Api, Client, ResourceExt};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn run(client: Client) {
    let monitors: Api<ImageMonitor> = Api::all(client.clone());

    Controller::new(monitors, Config::default())
        .run(reconcile, error_policy, Arc::new(client))
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("image monitor reconcile error: {}", e);
                RECONCILE_ERRORS_TOTAL.inc();
            }
        })
        .await;
}

async fn reconcile(monitor: Arc<ImageMonitor>, client: Arc<Client>) -> anyhow::Result<Action> {
    let api: Api<ImageMonitor> = Api::namespaced(
        (*client).clone(),
        monitor.namespace().as_deref().unwrap_or("default"),
    );

    finalizer(&api, FINALIZER, monitor, |event| async {
        match event {
            FinalizerEvent::Apply(monitor) => apply(&monitor, &client).await,
            FinalizerEvent::Cleanup(monitor) => cleanup(&monitor, &client).await,
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("finalizer error: {e}"))
}

fn error_policy(_monitor: Arc<ImageMonitor>, error: &kube::runtime::finalizer::Error<anyhow::Error>, _client: Arc<Client>) -> Action {
    error!("image monitor reconcile failed: {}", error);
    RECONCILE_ERRORS_TOTAL.inc();
    Action::requeue(Duration::from_secs(60))
}

async fn apply(monitor: &ImageMonitor, client: &Client) -> anyhow::Result<Action> {
    let namespace = monitor
        .spec
        .namespace
        .clone()
        .or_else(|| monitor.namespace())
        .unwrap_or_else(|| "default".to_string());
    let exclude = compile_exclude_pattern(monitor.spec.exclude_pattern.as_deref())?;

    let adapters: Vec<Box<dyn WorkloadAdapter>> = vec![
        Box::new(DeploymentAdapter::new(client.clone())),
        Box::new(StatefulSetAdapter::new(client.clone())),
        Box::new(DeploymentConfigAdapter::new(client.clone())),
    ];

    let mut labelled: i64 = 0;
    for adapter in &adapters {
        let workloads = adapter.list(&namespace).await?;
        let mut labelled_for_kind: i64 = 0;
        for workload in workloads {
            if let Some(re) = &exclude
                && re.is_match(&workload.name)
            {
                continue;
            }
            if let Err(e) = adapter.set_monitored_label(&namespace, &workload.name, true).await {
                warn!(namespace, kind = adapter.kind(), name = %workload.name, error = %e, "failed to label workload");
                continue;
            }
            labelled_for_kind += 1;
        }
        WORKLOADS_MONITORED.with_label_values(&[adapter.kind()]).set(labelled_for_kind);
        labelled += labelled_for_kind;
    }

    info!(namespace, labelled, "image monitor labelled workloads");
    Ok(Action::requeue(Duration::from_secs(10 * 60)))
}

async fn cleanup(monitor: &ImageMonitor, client: &Client) -> anyhow::Result<Action> {
    let namespace = monitor
        .spec
        .namespace
        .clone()
        .or_else(|| monitor.namespace())
        .unwrap_or_else(|| "default".to_string());

    let adapters: Vec<Box<dyn WorkloadAdapter>> = vec![
        Box::new(DeploymentAdapter::new(client.clone())),
        Box::new(StatefulSetAdapter::new(client.clone())),
        Box::new(DeploymentConfigAdapter::new(client.clone())),
    ];

    for adapter in &adapters {
        let workloads = adapter.list(&namespace).await?;
        for workload in workloads {
            if let Err(e) = adapter.set_monitored_label(&namespace, &workload.name, false).await {
                warn!(namespace, kind = adapter.kind(), name = %workload.name, error = %e, "failed to unlabel workload during cleanup");
            }
            if let Err(e) = adapter.clear_check_annotations(&namespace, &workload.name).await {
                warn!(namespace, kind = adapter.kind(), name = %workload.name, error = %e, "failed to clear check annotations during cleanup");
            }
        }
        WORKLOADS_MONITORED.with_label_values(&[adapter.kind()]).set(0);
    }

    info!(namespace, "image monitor cleanup removed heimdall labels and annotations");
    Ok(Action::await_change())
}

fn compile_exclude_pattern(pattern: Option<&str>) -> anyhow::Result<Option<Regex>> {
    match pattern {
        Some(p) if !p.is_empty() => Ok(Some(Regex::new(p)?)),
        _ => Ok(None),
    }
}
